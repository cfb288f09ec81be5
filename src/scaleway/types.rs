//! Newtypes for Scaleway lifecycle values to avoid stringly-typed code.

use std::fmt;
use std::ops::Deref;

macro_rules! newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub(crate) struct $name(String);

        impl $name {
            pub(crate) const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

newtype!(InstanceId);
newtype!(Zone);
newtype!(InstanceState);
newtype!(Action);

impl InstanceState {
    pub(crate) fn is_running(&self) -> bool {
        self.as_str() == "running"
    }

    pub(crate) fn is_stopped(&self) -> bool {
        matches!(self.as_str(), "stopped" | "stopped in place")
    }
}

impl Action {
    pub(crate) const POWER_ON: &'static str = "poweron";
    pub(crate) const REBOOT: &'static str = "reboot";
    pub(crate) const TERMINATE: &'static str = "terminate";
}
