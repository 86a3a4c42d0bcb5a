use super::*;

/// Decrypted credential bundle named by a realm.
#[derive(Clone, PartialEq, Eq)]
pub enum RealmBundle {
    /// `alias;username;password;secret`
    Console {
        username: String,
        password: String,
        secret: String,
    },
    /// `alias;community;port`
    Service { community: String, port: String },
}

impl fmt::Debug for RealmBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RealmBundle::Console { username, .. } => f
                .debug_struct("Console")
                .field("username", username)
                .finish_non_exhaustive(),
            RealmBundle::Service { port, .. } => f
                .debug_struct("Service")
                .field("port", port)
                .finish_non_exhaustive(),
        }
    }
}

impl RealmBundle {
    /// Value of `slot`, or `None` when this bundle kind has no such slot.
    pub fn get(&self, slot: Slot) -> Option<&str> {
        match (self, slot) {
            (RealmBundle::Console { username, .. }, Slot::Username) => Some(username),
            (RealmBundle::Console { password, .. }, Slot::Password) => Some(password),
            (RealmBundle::Console { secret, .. }, Slot::Secret) => Some(secret),
            (RealmBundle::Service { community, .. }, Slot::Community) => Some(community),
            (RealmBundle::Service { port, .. }, Slot::Port) => Some(port),
            _ => None,
        }
    }

    fn has_empty_field(&self) -> bool {
        match self {
            RealmBundle::Console {
                username,
                password,
                secret,
            } => username.is_empty() || password.is_empty() || secret.is_empty(),
            RealmBundle::Service { community, port } => community.is_empty() || port.is_empty(),
        }
    }
}

/// Realm name to bundle. Only complete bundles are ever stored.
#[derive(Debug, Clone, Default)]
pub struct RealmTable {
    realms: HashMap<String, RealmBundle>,
}

impl RealmTable {
    /// Parses a realm table.
    ///
    /// The field count picks the schema. Lines with another count, or whose
    /// tokens do not decrypt, are logged and skipped. Bundles with an empty
    /// field are dropped without a diagnostic. A later definition of the
    /// same name replaces an earlier one.
    pub fn parse(text: &str, file: &str, envelope: &Envelope) -> Self {
        let mut table = Self::default();
        for (line_no, line) in table_lines(text) {
            let fields: Vec<&str> = line.split(';').collect();
            let parsed = match fields.as_slice() {
                [name, username, password, secret] => {
                    parse_console(username, password, secret, envelope).map(|b| (*name, b))
                }
                [name, community, port] => parse_service(community, port, envelope).map(|b| (*name, b)),
                _ => {
                    warn!(
                        "{}",
                        malformed(
                            file,
                            line_no,
                            format!("expected 3 or 4 fields, found {}", fields.len())
                        )
                    );
                    continue;
                }
            };

            match parsed {
                Ok((name, bundle)) => {
                    let name = name.strip_prefix('*').unwrap_or(name);
                    if name.is_empty() {
                        warn!("{}", malformed(file, line_no, "empty realm name"));
                    } else if bundle.has_empty_field() {
                        debug!("{file}:{line_no}: realm {name} has an empty field, dropped");
                    } else {
                        table.insert(name, bundle);
                    }
                }
                Err(err) => warn!("{}", malformed(file, line_no, err.to_string())),
            }
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<&RealmBundle> {
        self.realms.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.realms.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.realms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.realms.is_empty()
    }

    /// Realm names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.realms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn insert(&mut self, name: &str, bundle: RealmBundle) {
        self.realms.insert(name.to_string(), bundle);
    }
}

fn decrypt_optional(envelope: &Envelope, raw: &str) -> Result<String, CryptoError> {
    if raw.is_empty() {
        Ok(String::new())
    } else {
        envelope.decrypt(raw)
    }
}

fn parse_console(
    username: &str,
    password: &str,
    secret: &str,
    envelope: &Envelope,
) -> Result<RealmBundle, CryptoError> {
    let password = decrypt_optional(envelope, password)?;
    let secret = if secret == "*" {
        password.clone()
    } else {
        decrypt_optional(envelope, secret)?
    };
    Ok(RealmBundle::Console {
        username: username.to_string(),
        password,
        secret,
    })
}

fn parse_service(community: &str, port: &str, envelope: &Envelope) -> Result<RealmBundle, CryptoError> {
    let community = decrypt_optional(envelope, community)?;
    let port = if port == "*" {
        DEFAULT_SERVICE_PORT.to_string()
    } else {
        port.to_string()
    };
    Ok(RealmBundle::Service { community, port })
}
