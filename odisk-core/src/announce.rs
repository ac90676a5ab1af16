//! Discovery announcements for the shared disks.
//!
//! The remote-disc protocol advertises one `_odisk._tcp` service per host
//! whose TXT record lists every disk. The socket side lives behind the
//! [`Publisher`] seam; this module builds the record and keeps it current.

use crate::config::ServerConfig;
use crate::error::NotifierError;
use crate::registry::{Catalog, ChangeNotifier};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

pub const SERVICE_TYPE: &str = "_odisk._tcp.local.";
pub const MEDIA_TYPE: &str = "public.cd-media";

/// A discovery service record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceRecord {
    /// Instance name, `<host>@<hostname>`.
    pub instance: String,
    pub service_type: String,
    pub port: u16,
    pub txt: BTreeMap<String, String>,
}

impl ServiceRecord {
    /// Builds the record for `catalog`. Resolves each disk's label.
    pub fn from_catalog(catalog: &Catalog, host: &str, hostname: &str, port: u16, mac: &str) -> Self {
        let mut txt = BTreeMap::new();
        txt.insert(
            "sys".to_string(),
            format!("waMA={mac},adVF=0x4,adDT=0x3,adCC=1"),
        );
        for (id, disk) in catalog.iter() {
            let label = disk.label();
            info!(
                "Announcing disk \"{}\" as {} with name \"{}\"",
                disk.path().display(),
                id,
                label
            );
            txt.insert(id.to_string(), format!("adVN={label},adVT={MEDIA_TYPE}"));
        }

        Self {
            instance: format!("{host}@{hostname}"),
            service_type: SERVICE_TYPE.to_string(),
            port,
            txt,
        }
    }

    /// Fully qualified service name.
    pub fn full_name(&self) -> String {
        format!("{}{}", self.instance, self.service_type)
    }
}

/// Transport that makes a [`ServiceRecord`] visible on the network.
pub trait Publisher: Send + Sync {
    fn publish(&self, record: &ServiceRecord) -> Result<(), NotifierError>;

    fn withdraw(&self, record: &ServiceRecord) -> Result<(), NotifierError>;
}

/// A publisher that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, record: &ServiceRecord) -> Result<(), NotifierError> {
        info!(
            "Publishing {} on port {} ({} disks)",
            record.full_name(),
            record.port,
            record.txt.len() - 1
        );
        Ok(())
    }

    fn withdraw(&self, record: &ServiceRecord) -> Result<(), NotifierError> {
        info!("Withdrawing {}", record.full_name());
        Ok(())
    }
}

/// [`ChangeNotifier`] that re-announces the catalog on every change.
#[derive(Debug)]
pub struct AnnouncingNotifier<P> {
    publisher: P,
    host: String,
    hostname: String,
    port: u16,
    mac_address: String,
    current: Mutex<Option<ServiceRecord>>,
}

impl<P: Publisher> AnnouncingNotifier<P> {
    pub fn new(publisher: P, config: &ServerConfig) -> Self {
        let hostname = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
        Self::with_hostname(publisher, config, hostname)
    }

    pub fn with_hostname(publisher: P, config: &ServerConfig, hostname: impl Into<String>) -> Self {
        Self {
            publisher,
            host: config.advertised_host(),
            hostname: hostname.into(),
            port: config.port,
            mac_address: config.mac_address.clone(),
            current: Mutex::new(None),
        }
    }

    /// The record most recently published.
    pub fn current(&self) -> Option<ServiceRecord> {
        self.current.lock().clone()
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

impl<P: Publisher> ChangeNotifier for AnnouncingNotifier<P> {
    fn update(&self, catalog: &Catalog) -> Result<(), NotifierError> {
        let record = ServiceRecord::from_catalog(
            catalog,
            &self.host,
            &self.hostname,
            self.port,
            &self.mac_address,
        );

        let mut current = self.current.lock();
        if let Some(previous) = current.as_ref() {
            self.publisher.withdraw(previous)?;
            *current = None;
        }
        self.publisher.publish(&record)?;
        *current = Some(record);
        Ok(())
    }
}
