// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::db::{SettingsStore, SettingsStoreExt};

pub fn read_bin<DB>(db: &DB)
where
    DB: SettingsStore,
{
    let key = "/sectors/0";
    let value = [1];
    db.write_bin(key, &value).unwrap();
    let res = db.read_bin(key).unwrap().unwrap();
    assert_eq!(value.as_ref(), res.as_slice());
}

pub fn write_read_obj<DB>(db: &DB)
where
    DB: SettingsStore,
{
    let key = "/sectors/42";
    let value = 42;
    db.write_obj(key, &value).unwrap();
    let res: i32 = db.read_obj(key).unwrap().unwrap();
    assert_eq!(value, res);

    // sector snapshots are rewritten after every transition, so the
    // settings column must never be configured as content-addressed.
    let value = 1337;
    db.write_obj(key, &value).unwrap();
    let res: i32 = db.read_obj(key).unwrap().unwrap();
    assert_eq!(value, res);
}

pub fn exists<DB>(db: &DB)
where
    DB: SettingsStore,
{
    let key = "/tasks/0";
    db.write_bin(key, &[1]).unwrap();
    assert!(db.exists(key).unwrap());
}

pub fn does_not_exist<DB>(db: &DB)
where
    DB: SettingsStore,
{
    let key = "/sectors/404";

    assert!(!db.exists(key).unwrap());
    assert!(db.read_obj::<i32>(key).unwrap().is_none());
    assert!(db.require_obj::<i32>(key).is_err());
}

pub fn delete<DB>(db: &DB)
where
    DB: SettingsStore,
{
    let key = "/tasks/7";
    db.write_obj(key, &"done").unwrap();
    db.delete(key).unwrap();
    assert!(!db.exists(key).unwrap());
    // deleting twice is fine
    db.delete(key).unwrap();
}

pub fn keys_with_prefix<DB>(db: &DB)
where
    DB: SettingsStore,
{
    db.write_obj("/sectors/1", &1).unwrap();
    db.write_obj("/sectors/2", &2).unwrap();
    db.write_obj("/sectorsx/3", &3).unwrap();
    db.write_obj("/tasks/1", &4).unwrap();

    let mut keys = db.keys_with_prefix("/sectors").unwrap();
    keys.sort();
    assert_eq!(keys, vec!["/sectors/1", "/sectors/2"]);
}
