#![doc = include_str!("../README.md")]
#![allow(clippy::needless_range_loop)]

pub mod action;
pub mod codec;
pub mod flow;
pub mod header;
pub mod message;
pub mod port;

pub use action::Action;
pub use codec::{encode, read_one, CodecError};
pub use flow::{FlowMod, FlowModCommand, FlowRemoved, FlowRemovedReason, Match};
pub use header::{MessageType, OfpHeader};
pub use message::{
    ErrorMsg, FeaturesReply, Message, MessageBody, PacketIn, PacketInReason, PacketOut,
};
pub use port::{PhysicalPort, PortReason, PortStatus};

/// Wire protocol version spoken by this codec (OpenFlow 1.0)
pub const OFP_VERSION: u8 = 0x01;

/// TCP port on which switches expect to find the controller
pub const DEFAULT_PORT: u16 = 6633;

/// Buffer id meaning "no packet is buffered on the switch"
pub const NO_BUFFER: u32 = 0xFFFF_FFFF;

/// Port number meaning "no port", used as the wildcard out_port of a flow delete
pub const OFPP_NONE: u16 = 0xFFFF;

/// Datapath identifier a switch reports during the features exchange
pub type DatapathId = u64;

/// Ethernet hardware address
pub type MacAddr = [u8; 6];

/// Derive To/From with an added "Unknown" variant catch-all for converting
/// from numerical values that do not match a valid variant in order to
/// avoid either panicking or cumbersome error handling.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a variant
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum_with_unknown!(
        pub enum Sample(u8) {
            Zero = 0,
            One = 1,
        }
    );

    #[test]
    fn unknown_values_survive_conversion() {
        assert_eq!(Sample::from(1), Sample::One);
        assert_eq!(Sample::from(9), Sample::Unknown(9));
        assert_eq!(u8::from(Sample::Unknown(9)), 9);
        assert_eq!(u8::from(Sample::Zero), 0);
    }
}
