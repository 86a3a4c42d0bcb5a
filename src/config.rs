//! Run configuration and SSH algorithm policy tables.
//!
//! [`RunConfig`] is the single explicit configuration value handed to every
//! component of a run; nothing here is process-global. The algorithm tables
//! back [`ConnectionSecurityOptions`](crate::session::ConnectionSecurityOptions).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::session::ConnectionSecurityOptions;

/// Environment variable naming the credential store directory.
pub const STORE_DIR_ENV: &str = "DO_DEVICE";

/// Console line ids are this offset plus the rotary index.
pub const DEFAULT_LINE_OFFSET: u32 = 2000;

/// Reverse-connect command; `{address}` and `{line}` are substituted.
pub const DEFAULT_CONNECT_TEMPLATE: &str = "connect {address}:{line}";

/// Poll counts and intervals of the console automation engine.
///
/// Defaults give a worst case of about 39 seconds for a line that never
/// shows a login prompt (3 x 1s banner wait plus 6 x 3 x 2s retries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PollPolicy {
    /// Polls while waiting for the banner after the reverse-connect request.
    pub banner_polls: u32,
    /// Delay before each banner poll.
    #[serde(with = "millis")]
    #[schemars(with = "u64")]
    pub banner_interval: Duration,
    /// Number of bare newlines sent while waiting for the login prompt.
    pub retry_attempts: u32,
    /// Polls after each newline.
    pub retry_polls: u32,
    /// Delay before each retry poll.
    #[serde(with = "millis")]
    #[schemars(with = "u64")]
    pub retry_interval: Duration,
    /// Polls for the `[confirm]` prompt after `disco`.
    pub confirm_polls: u32,
    /// Delay between confirm polls.
    #[serde(with = "millis")]
    #[schemars(with = "u64")]
    pub confirm_interval: Duration,
    /// Wait before the final read after acknowledging the confirmation.
    #[serde(with = "millis")]
    #[schemars(with = "u64")]
    pub confirm_settle: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            banner_polls: 3,
            banner_interval: Duration::from_secs(1),
            retry_attempts: 6,
            retry_polls: 3,
            retry_interval: Duration::from_secs(2),
            confirm_polls: 2,
            confirm_interval: Duration::from_secs(1),
            confirm_settle: Duration::from_secs(2),
        }
    }
}

impl PollPolicy {
    /// Upper bound of time spent on a line that never reaches a login prompt,
    /// not counting teardown.
    pub fn worst_case(&self) -> Duration {
        self.banner_interval * self.banner_polls
            + self.retry_interval * (self.retry_polls * self.retry_attempts)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Everything a console run needs to know besides the device id.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory holding the credential tables.
    pub store_dir: PathBuf,
    /// 0 is quiet; 1 adds debug diagnostics; 2 and above add raw traces.
    pub debug: u8,
    pub poll: PollPolicy,
    pub line_offset: u32,
    pub connect_template: String,
    pub security: ConnectionSecurityOptions,
}

impl RunConfig {
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            debug: 0,
            poll: PollPolicy::default(),
            line_offset: DEFAULT_LINE_OFFSET,
            connect_template: DEFAULT_CONNECT_TEMPLATE.to_string(),
            security: ConnectionSecurityOptions::legacy_compatible(),
        }
    }

    /// Reads the store directory from [`STORE_DIR_ENV`].
    ///
    /// A missing variable or a path that is not a directory is an error;
    /// no file is opened here.
    pub fn from_env() -> Result<Self, StoreError> {
        let dir = env::var_os(STORE_DIR_ENV).ok_or_else(|| {
            StoreError::Unavailable(format!("environment variable {STORE_DIR_ENV} must be set"))
        })?;
        let dir = PathBuf::from(dir);
        if !dir.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "unable to access directory {}",
                dir.display()
            )));
        }
        Ok(Self::new(dir))
    }

    /// Reverse-connect command for one line.
    pub fn connect_command(&self, address: &str, line: u32) -> String {
        self.connect_template
            .replace("{address}", address)
            .replace("{line}", &line.to_string())
    }

    /// Log filter matching the debug level.
    pub fn log_level(&self) -> log::LevelFilter {
        match self.debug {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

/// Modern key exchange only.
pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
];

/// Adds SHA-1 group exchange for mid-life device firmware.
pub const BALANCED_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA1,
];

/// Everything russh can speak, for console servers running old IOS images.
pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA1,
    kex::DH_GEX_SHA256,
    kex::DH_G1_SHA1,
    kex::DH_G14_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G15_SHA512,
    kex::DH_G16_SHA512,
    kex::DH_G17_SHA512,
    kex::DH_G18_SHA512,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::NONE,
];

pub static SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

pub static BALANCED_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_128_CBC,
];

pub static LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::CLEAR,
    cipher::NONE,
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_256_GCM,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
    cipher::CHACHA20_POLY1305,
];

pub const SECURE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

pub const BALANCED_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::NONE,
    mac::HMAC_SHA1,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
];

pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

pub const BALANCED_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
];

pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Dsa,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Ed25519,
    Algorithm::Rsa { hash: None },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
];
