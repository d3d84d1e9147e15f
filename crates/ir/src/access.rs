//! Class and member modifiers.
use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Dex access flags of a class, method or field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        /// Methods only; shares its bit with `VOLATILE`.
        const BRIDGE = 0x40;
        const TRANSIENT = 0x80;
        /// Methods only; shares its bit with `TRANSIENT`.
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

/// Printed names, indexed by bit position.
const FLAG_NAMES: [&str; 18] = [
    "public",
    "private",
    "protected",
    "static",
    "final",
    "synchronized",
    "volatile(bridge)",
    "transient(varargs)",
    "native",
    "interface",
    "abstract",
    "strictfp",
    "synthetic",
    "annotation",
    "enum",
    "<unused>",
    "<init>",
    "synchronized",
];

macro_rules! flag_accessors {
    ($($flag:ident => $is:ident, $set:ident $(, $unset:ident)?;)*) => {
        $(
            pub fn $is(self) -> bool {
                self.intersects(Self::$flag)
            }

            pub fn $set(&mut self) {
                self.insert(Self::$flag);
            }

            $(
                pub fn $unset(&mut self) {
                    self.remove(Self::$flag);
                }
            )?
        )*
    };
}

impl AccessFlags {
    flag_accessors! {
        PUBLIC => is_public, set_public, unset_public;
        PRIVATE => is_private, set_private, unset_private;
        PROTECTED => is_protected, set_protected, unset_protected;
        STATIC => is_static, set_static;
        FINAL => is_final, set_final, unset_final;
        SYNCHRONIZED => is_synchronized, set_synchronized, unset_synchronized;
        VOLATILE => is_volatile, set_volatile;
        BRIDGE => is_bridge, set_bridge, unset_bridge;
        TRANSIENT => is_transient, set_transient;
        VARARGS => is_varargs, set_varargs;
        NATIVE => is_native, set_native;
        INTERFACE => is_interface, set_interface, unset_interface;
        ABSTRACT => is_abstract, set_abstract, unset_abstract;
        STRICT => is_strict, set_strict;
        SYNTHETIC => is_synthetic, set_synthetic, unset_synthetic;
        ANNOTATION => is_annotation, set_annotation;
        ENUM => is_enum, set_enum;
        CONSTRUCTOR => is_constructor, set_constructor, unset_constructor;
        DECLARED_SYNCHRONIZED => is_declared_synchronized, set_declared_synchronized;
    }

    pub fn contains_all_of(self, other: Self) -> bool {
        self.contains(other)
    }

    pub fn contains_none_of(self, other: Self) -> bool {
        !self.intersects(other)
    }

    /// Clears `private` and `protected` and sets `public`.
    pub fn promote_to_public(&mut self) {
        self.remove(Self::PRIVATE | Self::PROTECTED);
        self.insert(Self::PUBLIC);
    }

    /// Like [`Self::promote_to_public`], but leaves private members alone.
    pub fn promote_non_private_to_public(&mut self) {
        if !self.is_private() {
            self.remove(Self::PROTECTED);
            self.insert(Self::PUBLIC);
        }
    }
}

impl fmt::Display for AccessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits = (*self - Self::CONSTRUCTOR).bits();
        let mut first = true;
        for (bit, name) in FLAG_NAMES.iter().enumerate() {
            if bits & (1 << bit) != 0 {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion() {
        let mut flags = AccessFlags::PRIVATE | AccessFlags::STATIC;
        flags.promote_non_private_to_public();
        assert_eq!(flags, AccessFlags::PRIVATE | AccessFlags::STATIC);
        flags.promote_to_public();
        assert_eq!(flags, AccessFlags::PUBLIC | AccessFlags::STATIC);

        let mut flags = AccessFlags::PROTECTED | AccessFlags::FINAL;
        flags.promote_non_private_to_public();
        assert!(flags.is_public() && !flags.is_protected() && flags.is_final());
    }

    #[test]
    fn aliases_share_bits() {
        let mut flags = AccessFlags::empty();
        flags.set_bridge();
        assert!(flags.is_volatile());
        flags.set_varargs();
        assert!(flags.is_transient());
        flags.unset_bridge();
        assert!(!flags.is_volatile());
    }

    #[test]
    fn containment() {
        let flags = AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL;
        assert!(flags.contains_all_of(AccessFlags::PUBLIC | AccessFlags::STATIC));
        assert!(!flags.contains_all_of(AccessFlags::PUBLIC | AccessFlags::ABSTRACT));
        assert!(flags.contains_none_of(AccessFlags::PRIVATE | AccessFlags::PROTECTED));
        assert!(!flags.contains_none_of(AccessFlags::PRIVATE | AccessFlags::FINAL));
    }

    #[test]
    fn display_skips_constructor_bit() {
        let flags = AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR | AccessFlags::BRIDGE;
        assert_eq!(flags.to_string(), "public volatile(bridge)");
        assert_eq!(AccessFlags::empty().to_string(), "");
        assert_eq!(
            AccessFlags::DECLARED_SYNCHRONIZED.to_string(),
            "synchronized"
        );
    }
}
