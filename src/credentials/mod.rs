//! Realm-based credential store.
//!
//! Two `;`-separated text tables live in one directory: a realm table of
//! reusable credential bundles and a device table whose secret fields are
//! empty, encrypted literals, or `*realm` references. Lookups read both
//! files, resolve references against the realm table and return either a
//! complete plaintext credential or an [`Unresolved`] reason. Nothing else
//! is touched: no network, no writes.
//!
//! # Main Components
//!
//! - [`CredentialStore`] - file-backed lookups for one store directory
//! - [`RealmTable`] - parsed and decrypted realm bundles
//! - [`FieldValue`] / [`resolve_field`] - per-field resolution
//! - [`ResolvedCredential`] / [`ServiceCredential`] - lookup results

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::cipher::Envelope;
use crate::config::RunConfig;
use crate::error::{ConfigError, CredentialError, CryptoError, StoreError, Unresolved};

pub use device::{DeviceRecord, ServiceRecord};
pub use realm::{RealmBundle, RealmTable};

/// Realm and device tables of the console (SSH) layout.
pub const CONSOLE_REALM_FILE: &str = "credentials.txt";
pub const CONSOLE_DEVICE_FILE: &str = "deviceinfo.txt";

/// Realm and device tables of the service (SNMP) layout.
pub const SERVICE_REALM_FILE: &str = "SNMP-credentials.txt";
pub const SERVICE_DEVICE_FILE: &str = "SNMP-deviceinfo.txt";

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SERVICE_PORT: u16 = 161;

/// One credential slot of a realm bundle or device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Username,
    Password,
    Secret,
    Community,
    Port,
}

impl Slot {
    pub fn name(self) -> &'static str {
        match self {
            Slot::Username => "username",
            Slot::Password => "password",
            Slot::Secret => "secret",
            Slot::Community => "community",
            Slot::Port => "port",
        }
    }

    /// Literals in these slots are tokens; the others are plain text.
    pub fn is_encrypted(self) -> bool {
        matches!(self, Slot::Password | Slot::Secret | Slot::Community)
    }
}

/// Raw content of one device-table field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Empty,
    /// A token for secret slots, plain text otherwise.
    Literal(String),
    /// `*name`; a bare `*` carries `None` and means the record's own realm.
    RealmRef(Option<String>),
}

impl FieldValue {
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            FieldValue::Empty
        } else if let Some(name) = raw.strip_prefix('*') {
            if name.is_empty() {
                FieldValue::RealmRef(None)
            } else {
                FieldValue::RealmRef(Some(name.to_string()))
            }
        } else {
            FieldValue::Literal(raw.to_string())
        }
    }

    fn realm_name(&self) -> Option<&str> {
        match self {
            FieldValue::RealmRef(Some(name)) => Some(name),
            _ => None,
        }
    }
}

/// Why a field could not be resolved. The field then counts as empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIssue {
    UnknownRealm(String),
    Crypto(CryptoError),
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldIssue::UnknownRealm(name) => write!(f, "realm *{name} unknown"),
            FieldIssue::Crypto(err) => write!(f, "{err}"),
        }
    }
}

/// Resolves one field against the realm table.
///
/// `bound` is the record's realm: the first known realm any of its fields
/// names. Empty fields and bare `*` take the bound realm's value for the
/// slot, or stay empty without one. An `Ok` value may still be empty.
pub fn resolve_field(
    value: &FieldValue,
    slot: Slot,
    bound: Option<&RealmBundle>,
    realms: &RealmTable,
    envelope: &Envelope,
) -> Result<String, FieldIssue> {
    match value {
        FieldValue::Empty | FieldValue::RealmRef(None) => Ok(bound
            .and_then(|realm| realm.get(slot))
            .unwrap_or_default()
            .to_string()),
        FieldValue::RealmRef(Some(name)) => match realms.get(name) {
            Some(realm) => Ok(realm.get(slot).unwrap_or_default().to_string()),
            None => Err(FieldIssue::UnknownRealm(name.clone())),
        },
        FieldValue::Literal(raw) if slot.is_encrypted() => {
            envelope.decrypt(raw).map_err(FieldIssue::Crypto)
        }
        FieldValue::Literal(raw) => Ok(raw.clone()),
    }
}

/// The realm a record binds to: the first known realm named by its fields.
fn bound_realm<'a>(realms: &'a RealmTable, fields: &[&FieldValue]) -> Option<&'a RealmBundle> {
    fields
        .iter()
        .filter_map(|field| field.realm_name())
        .find_map(|name| realms.get(name))
}

/// Fully-resolved credential for one console device.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub device: String,
    pub address: String,
    pub device_type: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub secret: String,
}

impl fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("device", &self.device)
            .field("address", &self.address)
            .field("device_type", &self.device_type)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Fully-resolved credential for one device of the service layout.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceCredential {
    pub device: String,
    pub address: String,
    pub community: String,
    pub port: u16,
}

impl fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredential")
            .field("device", &self.device)
            .field("address", &self.address)
            .field("community", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// File-backed credential lookups for one store directory.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
    envelope: Envelope,
}

impl CredentialStore {
    /// Opens a store directory using the process-wide key.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::with_envelope(dir, Envelope::fixed().clone())
    }

    /// Opens a store directory with an explicit key.
    pub fn with_envelope(dir: impl Into<PathBuf>, envelope: Envelope) -> Result<Self, StoreError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "unable to access directory {}",
                dir.display()
            )));
        }
        Ok(Self { dir, envelope })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self, StoreError> {
        Self::open(config.store_dir.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Loads the console realm table. Zero realms is a valid, empty table.
    pub fn console_realms(&self) -> Result<RealmTable, StoreError> {
        self.load_realms(CONSOLE_REALM_FILE)
    }

    /// Loads the service realm table.
    pub fn service_realms(&self) -> Result<RealmTable, StoreError> {
        self.load_realms(SERVICE_REALM_FILE)
    }

    /// Resolves the console credential of `device`.
    pub fn resolve(&self, device: &str) -> Result<ResolvedCredential, CredentialError> {
        let realms = self.console_realms()?;
        let (label, text) = self.read(CONSOLE_DEVICE_FILE)?;
        debug!("resolving {device} from {label}");

        let record = device::find_console(&text, &label, device)
            .ok_or_else(|| Unresolved::NotFound(device.to_string()))?;
        Ok(self.resolve_console_record(&record, &realms)?)
    }

    /// Resolves the service credential of `device`.
    pub fn resolve_service(&self, device: &str) -> Result<ServiceCredential, CredentialError> {
        let realms = self.service_realms()?;
        let (label, text) = self.read(SERVICE_DEVICE_FILE)?;
        debug!("resolving {device} from {label}");

        let record = device::find_service(&text, &label, device)
            .ok_or_else(|| Unresolved::NotFound(device.to_string()))?;
        Ok(self.resolve_service_record(&record, &realms)?)
    }

    /// Resolves an already-parsed console record.
    pub fn resolve_console_record(
        &self,
        record: &DeviceRecord,
        realms: &RealmTable,
    ) -> Result<ResolvedCredential, Unresolved> {
        let bound = bound_realm(realms, &[&record.username, &record.password, &record.secret]);
        let field = |value: &FieldValue, slot: Slot| {
            self.field_or_empty(&record.id, value, slot, bound, realms)
        };

        let username = field(&record.username, Slot::Username);
        let password = field(&record.password, Slot::Password);
        let secret = field(&record.secret, Slot::Secret);

        for (value, slot) in [
            (&username, Slot::Username),
            (&password, Slot::Password),
            (&secret, Slot::Secret),
        ] {
            if value.is_empty() {
                return Err(Unresolved::MissingField {
                    device: record.id.clone(),
                    field: slot.name(),
                });
            }
        }

        let port = match record.port.as_deref() {
            None | Some("") => DEFAULT_SSH_PORT,
            Some(raw) => parse_port(&record.id, raw)?,
        };

        Ok(ResolvedCredential {
            device: record.id.clone(),
            address: record.address_or_id().to_string(),
            device_type: record.device_type.clone(),
            port,
            username,
            password,
            secret,
        })
    }

    /// Resolves an already-parsed service record.
    pub fn resolve_service_record(
        &self,
        record: &ServiceRecord,
        realms: &RealmTable,
    ) -> Result<ServiceCredential, Unresolved> {
        let bound = bound_realm(realms, &[&record.community, &record.port]);
        let community = self.field_or_empty(&record.id, &record.community, Slot::Community, bound, realms);
        if community.is_empty() {
            return Err(Unresolved::MissingField {
                device: record.id.clone(),
                field: Slot::Community.name(),
            });
        }

        let port = self.field_or_empty(&record.id, &record.port, Slot::Port, bound, realms);
        let port = if port.is_empty() {
            DEFAULT_SERVICE_PORT
        } else {
            parse_port(&record.id, &port)?
        };

        Ok(ServiceCredential {
            device: record.id.clone(),
            address: record.address_or_id().to_string(),
            community,
            port,
        })
    }

    fn field_or_empty(
        &self,
        device: &str,
        value: &FieldValue,
        slot: Slot,
        bound: Option<&RealmBundle>,
        realms: &RealmTable,
    ) -> String {
        match resolve_field(value, slot, bound, realms, &self.envelope) {
            Ok(resolved) => resolved,
            Err(issue) => {
                warn!("{} for {device}: {issue}", slot.name());
                String::new()
            }
        }
    }

    fn load_realms(&self, file: &str) -> Result<RealmTable, StoreError> {
        let (label, text) = self.read(file)?;
        let table = RealmTable::parse(&text, &label, &self.envelope);
        if table.is_empty() {
            debug!("read no realms from {label}");
        } else {
            debug!("read {} realms from {label}", table.len());
        }
        Ok(table)
    }

    fn read(&self, file: &str) -> Result<(String, String), StoreError> {
        let path = self.dir.join(file);
        let text = fs::read_to_string(&path).map_err(|source| StoreError::File {
            path: path.clone(),
            source,
        })?;
        Ok((file.to_string(), text))
    }
}

fn parse_port(device: &str, raw: &str) -> Result<u16, Unresolved> {
    raw.trim()
        .parse::<u16>()
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| Unresolved::BadPort {
            device: device.to_string(),
            port: raw.to_string(),
        })
}

/// Content lines of a table: 1-based line number and the line with leading
/// whitespace removed. Blank lines and `#` comments are skipped.
fn table_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim_start()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

fn malformed(file: &str, line: usize, reason: impl Into<String>) -> ConfigError {
    ConfigError {
        file: file.to_string(),
        line,
        reason: reason.into(),
    }
}

mod device;
mod realm;
