/*
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the MIT License. See the LICENSE file in the project root for full license information.
 */

//! Traits shared by TPM enumerations and marshalable structures

use crate::error::TpmError;
use crate::tpm_buffer::TpmBuffer;

/// Common trait for all TPM enumeration types
pub trait TpmEnum<T> {
    /// Get the numeric value of the enum
    fn get_value(&self) -> T;

    /// Create enum from a numeric value
    fn try_from_value(value: T) -> Result<Self, TpmError>
    where
        Self: Sized;
}

/// Trait for structures that can be marshaled to/from TPM wire format
pub trait TpmMarshaller {
    /// Append the canonical big-endian encoding of `self`
    fn to_tpm(&self, buffer: &mut TpmBuffer) -> Result<(), TpmError>;

    /// Read a value previously written by [`TpmMarshaller::to_tpm`]
    fn from_tpm(buffer: &mut TpmBuffer) -> Result<Self, TpmError>
    where
        Self: Sized;

    /// Canonical encoding as a standalone byte vector
    fn to_bytes(&self) -> Result<Vec<u8>, TpmError> {
        let mut buffer = TpmBuffer::new();
        self.to_tpm(&mut buffer)?;
        Ok(buffer.into_bytes())
    }
}

/// Declares a `#[repr]` TPM constant enum together with its [`TpmEnum`]
/// conversions and a `name()` accessor.
macro_rules! tpm_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $repr:ident {
            $( $variant:ident = $value:expr, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $name {
            $( $variant = $value, )+
        }

        impl $name {
            /// Every defined value, in declaration order
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )+ ];

            /// Constant name without the type prefix
            pub fn name(&self) -> &'static str {
                match self {
                    $( $name::$variant => stringify!($variant), )+
                }
            }
        }

        impl $crate::tpm_structure::TpmEnum<$repr> for $name {
            fn get_value(&self) -> $repr {
                *self as $repr
            }

            fn try_from_value(value: $repr) -> Result<Self, $crate::error::TpmError> {
                match value {
                    $( v if v == $value => Ok($name::$variant), )+
                    _ => Err($crate::error::TpmError::InvalidEnumValue {
                        type_name: stringify!($name),
                        value: u64::from(value),
                    }),
                }
            }
        }
    };
}

pub(crate) use tpm_enum;
