//! Registration of device handler types and their administrative entries.
//!
//! Each registered type may get a standard entry named
//! `"<type name>/trace_level"`. Reading it lists the active trace flags;
//! writing it changes them:
//!
//! ```text
//! all | none | default | add <flag> | del <flag> | value <hex>
//! ```

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;

use crate::{
    dev_type::DevType,
    trace::{TRACE_ALL, TRACE_TOKENS, TraceFlags, token_flag},
};

pub const TRACE_LEVEL_ENTRY: &str = "trace_level";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegisterError {
    #[error("device type name must not be empty")]
    EmptyName,
    #[error("device type {0} is already registered")]
    AlreadyRegistered(&'static str),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProcError {
    #[error("device type {0} is not registered")]
    NotRegistered(String),
    #[error("administrative entry for {0} already exists")]
    EntryExists(&'static str),
    #[error("no administrative entry {0}")]
    NoEntry(String),
    #[error("unknown trace flag {0}")]
    UnknownFlag(String),
    #[error("invalid trace_level command: {0}")]
    InvalidCommand(String),
}

#[derive(Default)]
pub struct Registry {
    dev_types: Mutex<BTreeMap<&'static str, DevType>>,
    entries: Mutex<BTreeMap<String, Arc<TraceFlags>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_dev_driver(&self, dev_type: &DevType) -> Result<(), RegisterError> {
        if dev_type.name.is_empty() {
            return Err(RegisterError::EmptyName);
        }

        let mut dev_types = lock(&self.dev_types);
        if dev_types.contains_key(dev_type.name) {
            log::error!("Device handler {} already registered", dev_type.name);
            return Err(RegisterError::AlreadyRegistered(dev_type.name));
        }
        dev_types.insert(dev_type.name, dev_type.clone());

        log::info!(
            "Device handler {} for type {} registered successfully",
            dev_type.name,
            u8::from(dev_type.peripheral_type)
        );
        Ok(())
    }

    /// Unregistering a type that is not registered only logs.
    pub fn unregister_dev_driver(&self, dev_type: &DevType) {
        match lock(&self.dev_types).remove(dev_type.name) {
            Some(_) => log::info!("Device handler {} unloaded", dev_type.name),
            None => log::error!("Device handler {} not registered", dev_type.name),
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        lock(&self.dev_types).contains_key(name)
    }

    /// Names of the registered types, sorted.
    pub fn dev_types(&self) -> Vec<&'static str> {
        lock(&self.dev_types).keys().copied().collect()
    }

    /// Create the standard administrative entry for a registered type.
    pub fn build_std_proc(&self, dev_type: &DevType) -> Result<(), ProcError> {
        if !self.is_registered(dev_type.name) {
            return Err(ProcError::NotRegistered(dev_type.name.to_string()));
        }

        let mut entries = lock(&self.entries);
        let path = entry_path(dev_type.name);
        if entries.contains_key(&path) {
            return Err(ProcError::EntryExists(dev_type.name));
        }
        log::debug!("Creating administrative entry {path}");
        entries.insert(path, dev_type.trace_flags.clone());
        Ok(())
    }

    pub fn destroy_std_proc(&self, dev_type: &DevType) {
        if lock(&self.entries).remove(&entry_path(dev_type.name)).is_none() {
            log::debug!("No administrative entry for {}", dev_type.name);
        }
    }

    pub fn has_proc_entry(&self, path: &str) -> bool {
        lock(&self.entries).contains_key(path)
    }

    /// Read an administrative entry.
    pub fn proc_read(&self, path: &str) -> Result<String, ProcError> {
        let flags = self.entry(path)?;
        let names = flags.names();
        let mut out = format!("trace_level: {:#010x}\n", flags.get());
        if names.is_empty() {
            out.push_str("none\n");
        } else {
            out.push_str(&names.join(" | "));
            out.push('\n');
        }
        Ok(out)
    }

    /// Write a command to an administrative entry.
    pub fn proc_write(&self, path: &str, input: &str) -> Result<(), ProcError> {
        let flags = self.entry(path)?;
        let mut words = input.split_whitespace();
        let command = words.next().unwrap_or_default();
        let argument = words.next();

        match (command, argument) {
            ("all", None) => flags.set(TRACE_ALL),
            ("none", None) => flags.set(0),
            ("default", None) => flags.reset(),
            ("add", Some(name)) => flags.add(parse_flag(name)?),
            ("del", Some(name)) => flags.remove(parse_flag(name)?),
            ("value", Some(value)) => {
                let value = value.trim_start_matches("0x");
                let value = u32::from_str_radix(value, 16)
                    .map_err(|_| ProcError::InvalidCommand(input.trim().to_string()))?;
                flags.set(value);
            }
            _ => return Err(ProcError::InvalidCommand(input.trim().to_string())),
        }

        log::info!("Changed trace level for {path}: {:#010x}", flags.get());
        Ok(())
    }

    fn entry(&self, path: &str) -> Result<Arc<TraceFlags>, ProcError> {
        lock(&self.entries)
            .get(path)
            .cloned()
            .ok_or_else(|| ProcError::NoEntry(path.to_string()))
    }
}

pub fn entry_path(name: &str) -> String {
    format!("{name}/{TRACE_LEVEL_ENTRY}")
}

fn parse_flag(name: &str) -> Result<u32, ProcError> {
    token_flag(name).ok_or_else(|| {
        log::error!(
            "Unknown trace flag {name}, expected one of: {}",
            TRACE_TOKENS
                .iter()
                .map(|(token, _)| *token)
                .collect::<Vec<_>>()
                .join(", ")
        );
        ProcError::UnknownFlag(name.to_string())
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use scst_scsi::commands::inquiry::PeripheralDeviceType;

    use super::*;
    use crate::trace::{DEFAULT_DEV_LOG_FLAGS, TRACE_MINOR, TRACE_SCSI};

    fn dev_type(name: &'static str) -> DevType {
        DevType::new(name, PeripheralDeviceType::CdRomDevice, DEFAULT_DEV_LOG_FLAGS)
    }

    #[test]
    fn duplicate_and_empty_names_are_rejected() {
        let registry = Registry::new();
        let cdrom = dev_type("dev_cdrom");

        registry.register_dev_driver(&cdrom).unwrap();
        assert_eq!(
            registry.register_dev_driver(&cdrom),
            Err(RegisterError::AlreadyRegistered("dev_cdrom"))
        );
        assert_eq!(
            registry.register_dev_driver(&dev_type("")),
            Err(RegisterError::EmptyName)
        );

        registry.unregister_dev_driver(&cdrom);
        assert!(!registry.is_registered("dev_cdrom"));
        assert!(registry.dev_types().is_empty());
    }

    #[test]
    fn proc_entry_needs_registration() {
        let registry = Registry::new();
        let cdrom = dev_type("dev_cdrom");
        assert_eq!(
            registry.build_std_proc(&cdrom),
            Err(ProcError::NotRegistered("dev_cdrom".into()))
        );

        registry.register_dev_driver(&cdrom).unwrap();
        registry.build_std_proc(&cdrom).unwrap();
        assert!(registry.has_proc_entry("dev_cdrom/trace_level"));
        assert_eq!(
            registry.build_std_proc(&cdrom),
            Err(ProcError::EntryExists("dev_cdrom"))
        );

        registry.destroy_std_proc(&cdrom);
        assert!(!registry.has_proc_entry("dev_cdrom/trace_level"));
    }

    #[test]
    fn trace_level_commands() {
        let registry = Registry::new();
        let cdrom = dev_type("dev_cdrom");
        registry.register_dev_driver(&cdrom).unwrap();
        registry.build_std_proc(&cdrom).unwrap();
        let path = entry_path("dev_cdrom");

        registry.proc_write(&path, "none").unwrap();
        assert_eq!(cdrom.trace_flags.get(), 0);
        assert!(registry.proc_read(&path).unwrap().ends_with("none\n"));

        registry.proc_write(&path, "add scsi\n").unwrap();
        registry.proc_write(&path, "add minor").unwrap();
        registry.proc_write(&path, "del scsi").unwrap();
        assert_eq!(cdrom.trace_flags.get(), TRACE_MINOR);

        registry.proc_write(&path, "value 0x800").unwrap();
        assert_eq!(cdrom.trace_flags.get(), TRACE_SCSI);

        registry.proc_write(&path, "default").unwrap();
        assert_eq!(cdrom.trace_flags.get(), DEFAULT_DEV_LOG_FLAGS);

        registry.proc_write(&path, "all").unwrap();
        assert_eq!(cdrom.trace_flags.get(), TRACE_ALL);
    }

    #[test]
    fn bad_trace_level_commands() {
        let registry = Registry::new();
        let cdrom = dev_type("dev_cdrom");
        registry.register_dev_driver(&cdrom).unwrap();
        registry.build_std_proc(&cdrom).unwrap();
        let path = entry_path("dev_cdrom");

        assert_eq!(
            registry.proc_write(&path, "add bogus"),
            Err(ProcError::UnknownFlag("bogus".into()))
        );
        assert!(matches!(
            registry.proc_write(&path, "value xyz"),
            Err(ProcError::InvalidCommand(_))
        ));
        assert!(matches!(
            registry.proc_write(&path, "add"),
            Err(ProcError::InvalidCommand(_))
        ));
        assert_eq!(
            registry.proc_read("dev_disk/trace_level"),
            Err(ProcError::NoEntry("dev_disk/trace_level".into()))
        );
        assert_eq!(cdrom.trace_flags.get(), DEFAULT_DEV_LOG_FLAGS);
    }
}
