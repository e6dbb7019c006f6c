//! HID usage codes and the catalog that maps them onto controls
//!
//! A [`Usage`] packs the usage page into the upper 16 bits and the usage id into
//! the lower 16 bits, the same layout the report descriptor uses for extended
//! usages. The [`catalog`] module turns known usages into control metadata.

pub mod catalog;

pub use catalog::{AxisTypeDescriptor, ControlKind, UsageCatalog};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generic Desktop usage page
pub const GENERIC_DESKTOP_PAGE: u16 = 0x0001;

/// Button usage page
pub const BUTTON_PAGE: u16 = 0x0009;

/// Number of button usages the catalog recognizes (Button 1 ..= Button 256)
pub const MAX_BUTTONS: u16 = 256;

/// Extended HID usage (page << 16 | id)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Usage(pub u32);

impl Usage {
    pub const X: Usage = Usage::generic_desktop(0x30);
    pub const Y: Usage = Usage::generic_desktop(0x31);
    pub const Z: Usage = Usage::generic_desktop(0x32);
    pub const RX: Usage = Usage::generic_desktop(0x33);
    pub const RY: Usage = Usage::generic_desktop(0x34);
    pub const RZ: Usage = Usage::generic_desktop(0x35);
    pub const SLIDER: Usage = Usage::generic_desktop(0x36);
    pub const DIAL: Usage = Usage::generic_desktop(0x37);
    pub const WHEEL: Usage = Usage::generic_desktop(0x38);
    pub const HAT_SWITCH: Usage = Usage::generic_desktop(0x39);
    pub const START: Usage = Usage::generic_desktop(0x3D);
    pub const SELECT: Usage = Usage::generic_desktop(0x3E);
    pub const SYSTEM_CONTROL: Usage = Usage::generic_desktop(0x80);
    pub const DPAD_UP: Usage = Usage::generic_desktop(0x90);
    pub const DPAD_DOWN: Usage = Usage::generic_desktop(0x91);
    pub const DPAD_LEFT: Usage = Usage::generic_desktop(0x92);
    pub const DPAD_RIGHT: Usage = Usage::generic_desktop(0x93);

    pub const fn new(page: u16, id: u16) -> Self {
        Usage(((page as u32) << 16) | id as u32)
    }

    pub const fn generic_desktop(id: u16) -> Self {
        Usage::new(GENERIC_DESKTOP_PAGE, id)
    }

    /// Button usage, 1-based as in the HID usage tables
    pub const fn button(index: u16) -> Self {
        Usage::new(BUTTON_PAGE, index)
    }

    pub const fn page(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn id(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl From<u32> for Usage {
    fn from(raw: u32) -> Self {
        Usage(raw)
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}
