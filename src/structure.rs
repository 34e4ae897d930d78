//! sdio-fat - Useful macros for on-disk little-endian structures.
//!
//! The type using these macros must provide `fn data(&self) -> &[u8]`, and
//! for the setter forms also `fn data_mut(&mut self) -> &mut [u8]`.

macro_rules! define_field {
    ($name:ident, u8, $offset:expr) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the `", stringify!($name), "` field"),
            pub fn $name(&self) -> u8 {
                self.data()[$offset]
            }
        }
    };

    ($name:ident, u16, $offset:expr) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the `", stringify!($name), "` field"),
            pub fn $name(&self) -> u16 {
                let d = self.data();
                u16::from_le_bytes([d[$offset], d[$offset + 1]])
            }
        }
    };

    ($name:ident, u32, $offset:expr) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the `", stringify!($name), "` field"),
            pub fn $name(&self) -> u32 {
                let d = self.data();
                u32::from_le_bytes([d[$offset], d[$offset + 1], d[$offset + 2], d[$offset + 3]])
            }
        }
    };

    (set $set_name:ident, u8, $offset:expr) => {
        doc_comment::doc_comment! {
            concat!("Set the value of the `", stringify!($set_name), "` field"),
            pub fn $set_name(&mut self, value: u8) {
                self.data_mut()[$offset] = value;
            }
        }
    };

    (set $set_name:ident, u16, $offset:expr) => {
        doc_comment::doc_comment! {
            concat!("Set the value of the `", stringify!($set_name), "` field"),
            pub fn $set_name(&mut self, value: u16) {
                self.data_mut()[$offset..$offset + 2].copy_from_slice(&value.to_le_bytes());
            }
        }
    };

    (set $set_name:ident, u32, $offset:expr) => {
        doc_comment::doc_comment! {
            concat!("Set the value of the `", stringify!($set_name), "` field"),
            pub fn $set_name(&mut self, value: u32) {
                self.data_mut()[$offset..$offset + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
    };

    (set $set_name:ident, [u8; $len:expr], $offset:expr) => {
        doc_comment::doc_comment! {
            concat!("Set the value of the `", stringify!($set_name), "` field"),
            pub fn $set_name(&mut self, value: &[u8; $len]) {
                self.data_mut()[$offset..$offset + $len].copy_from_slice(value);
            }
        }
    };
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
