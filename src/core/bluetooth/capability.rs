//! Capability inspection for characteristics and descriptors
//! Classifies what an attribute supports from its GATT property or
//! permission bitmask. Nothing here is cached, callers recompute from the
//! live discovered graph.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// GATT characteristic property bits (Bluetooth Core Vol 3, Part G, 3.3.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_NO_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);
    pub const SIGNED_WRITE: Self = Self(0x40);
    pub const EXTENDED_PROPS: Self = Self(0x80);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Descriptor permission bits, as reported by the host stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DescriptorPermissions(u16);

impl DescriptorPermissions {
    pub const READ: Self = Self(0x0001);
    pub const READ_ENCRYPTED: Self = Self(0x0002);
    pub const READ_ENCRYPTED_MITM: Self = Self(0x0004);
    pub const WRITE: Self = Self(0x0010);
    pub const WRITE_ENCRYPTED: Self = Self(0x0020);
    pub const WRITE_ENCRYPTED_MITM: Self = Self(0x0040);
    pub const WRITE_SIGNED: Self = Self(0x0080);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for DescriptorPermissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// What a single attribute can be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet {
    pub readable: bool,
    pub writable: bool,
    pub writable_without_response: bool,
    pub notifiable: bool,
    pub indicatable: bool,
}

impl CapabilitySet {
    pub fn from_properties(properties: CharacteristicProperties) -> Self {
        Self {
            readable: properties.contains(CharacteristicProperties::READ),
            writable: properties.contains(CharacteristicProperties::WRITE),
            writable_without_response: properties
                .contains(CharacteristicProperties::WRITE_NO_RESPONSE),
            notifiable: properties.contains(CharacteristicProperties::NOTIFY),
            indicatable: properties.contains(CharacteristicProperties::INDICATE),
        }
    }

    /// Descriptors only carry read/write permissions.
    pub fn from_permissions(permissions: DescriptorPermissions) -> Self {
        Self {
            readable: permissions.contains(DescriptorPermissions::READ),
            writable: permissions.contains(DescriptorPermissions::WRITE),
            ..Self::default()
        }
    }

    /// True when either a write with or without response is possible.
    pub fn is_any_writable(&self) -> bool {
        self.writable || self.writable_without_response
    }

    /// True when the attribute can push unsolicited updates.
    pub fn supports_updates(&self) -> bool {
        self.notifiable || self.indicatable
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut labels = Vec::new();
        if self.readable {
            labels.push("READABLE");
        }
        if self.writable {
            labels.push("WRITABLE");
        }
        if self.writable_without_response {
            labels.push("WRITABLE WITHOUT RESPONSE");
        }
        if self.indicatable {
            labels.push("INDICATABLE");
        }
        if self.notifiable {
            labels.push("NOTIFIABLE");
        }
        if labels.is_empty() {
            labels.push("EMPTY");
        }
        write!(f, "{}", labels.join(", "))
    }
}

pub fn is_readable(properties: CharacteristicProperties) -> bool {
    CapabilitySet::from_properties(properties).readable
}

pub fn is_writable(properties: CharacteristicProperties) -> bool {
    CapabilitySet::from_properties(properties).writable
}

pub fn is_writable_without_response(properties: CharacteristicProperties) -> bool {
    CapabilitySet::from_properties(properties).writable_without_response
}

pub fn is_notifiable(properties: CharacteristicProperties) -> bool {
    CapabilitySet::from_properties(properties).notifiable
}

pub fn is_indicatable(properties: CharacteristicProperties) -> bool {
    CapabilitySet::from_properties(properties).indicatable
}
