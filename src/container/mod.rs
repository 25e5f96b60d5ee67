use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

mod error;

pub use error::{Error, Result};

/// The maximum allowed length for a [`ContainerID`].
const CONTAINER_ID_MAX_LEN: usize = 255;

/// A validated container identifier.
///
/// # Examples
///
/// ```
/// # use npu_monitor::container::{ContainerID, Error};
/// let raw_id = "abc123abc123abc123abc123abc123abc123abc123abc123abc123abc123abcd";
/// let container_id = ContainerID::new(raw_id).unwrap();
/// assert_eq!(container_id.as_ref(), "abc123abc123abc123abc123abc123abc123abc123abc123abc123abc123abcd");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// Creates a new `ContainerID` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerID`] if the input is empty or its length exceeds
    /// [`CONTAINER_ID_MAX_LEN`].
    ///
    /// # Examples
    ///
    /// ```
    /// # use npu_monitor::container::ContainerID;
    /// assert!(ContainerID::new("0123abcd").is_ok());
    /// assert!(ContainerID::new("").is_err());
    /// ```
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() || src.len() > CONTAINER_ID_MAX_LEN {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContainerID {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The devices resolved for a single container during one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAssignment {
    id: ContainerID,
    name: String,
    devices: Vec<u32>,
}

impl DeviceAssignment {
    /// Constructs a [`DeviceAssignment`].
    ///
    /// # Arguments
    ///
    /// * `id` - The container the devices belong to.
    /// * `name` - Human-readable name, usually `<namespace>_<pod>_<container>`.
    /// * `devices` - Device indices in the order they were declared.
    pub fn new(id: ContainerID, name: impl Into<String>, devices: Vec<u32>) -> Self {
        Self {
            id,
            name: name.into(),
            devices,
        }
    }

    pub fn id(&self) -> &ContainerID {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn devices(&self) -> &[u32] {
        &self.devices
    }
}

/// The device assignments of every attributable container, keyed by container id.
///
/// A snapshot always replaces the previous one; it is never merged.
pub type Snapshot = HashMap<ContainerID, DeviceAssignment>;
