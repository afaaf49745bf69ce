//! [`BusAccess`] – the I²C bus/address pair a hardware unit talks through.
//!
//! Hardware units embed a `BusAccess` value read from their configuration
//! instead of extending a bus-specific base type.
//!
//! | Key | Type | Default |
//! |---|---|---|
//! | `bus` | integer | `1` |
//! | `address` | integer, 7-bit | `0x20` |

use std::fmt;

use robokit_types::{ConfigError, Configuration};

pub const DEFAULT_BUS: u8 = 1;
pub const DEFAULT_ADDRESS: u8 = 0x20;

/// Highest valid 7-bit device address.
const MAX_ADDRESS: i64 = 0x7f;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusAccess {
    bus: u8,
    address: u8,
}

impl Default for BusAccess {
    fn default() -> Self {
        Self {
            bus: DEFAULT_BUS,
            address: DEFAULT_ADDRESS,
        }
    }
}

impl BusAccess {
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when `address` does not fit in 7 bits.
    pub fn new(bus: u8, address: u8) -> Result<Self, ConfigError> {
        if i64::from(address) > MAX_ADDRESS {
            return Err(ConfigError::Invalid {
                key: "address".to_string(),
                reason: format!("0x{address:02x} is not a 7-bit device address"),
            });
        }
        Ok(Self { bus, address })
    }

    /// Read `bus` and `address` from `config`, falling back to the defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_config(config: &Configuration) -> Result<Self, ConfigError> {
        let bus = config.get_i64("bus", i64::from(DEFAULT_BUS));
        let address = config.get_i64("address", i64::from(DEFAULT_ADDRESS));
        let bus = u8::try_from(bus).map_err(|_| ConfigError::Invalid {
            key: "bus".to_string(),
            reason: format!("{bus} is not a bus number"),
        })?;
        let address = u8::try_from(address).map_err(|_| ConfigError::Invalid {
            key: "address".to_string(),
            reason: format!("{address} is not a 7-bit device address"),
        })?;
        Self::new(bus, address)
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

impl fmt::Display for BusAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i2c-{}@0x{:02x}", self.bus, self.address)
    }
}
