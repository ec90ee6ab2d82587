//! JVM access flag bits and their source/Smali keywords.

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_PRIVATE: u16 = 0x0002;
pub(crate) const ACC_PROTECTED: u16 = 0x0004;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_FINAL: u16 = 0x0010;
pub(crate) const ACC_SYNCHRONIZED: u16 = 0x0020;
pub(crate) const ACC_VOLATILE: u16 = 0x0040;
pub(crate) const ACC_BRIDGE: u16 = 0x0040;
pub(crate) const ACC_TRANSIENT: u16 = 0x0080;
pub(crate) const ACC_VARARGS: u16 = 0x0080;
pub(crate) const ACC_NATIVE: u16 = 0x0100;
pub(crate) const ACC_INTERFACE: u16 = 0x0200;
pub(crate) const ACC_ABSTRACT: u16 = 0x0400;
pub(crate) const ACC_STRICT: u16 = 0x0800;
pub(crate) const ACC_SYNTHETIC: u16 = 0x1000;
pub(crate) const ACC_ANNOTATION: u16 = 0x2000;
pub(crate) const ACC_ENUM: u16 = 0x4000;

const CLASS_FLAGS: [(u16, &str); 9] = [
    (ACC_PUBLIC, "public"),
    (ACC_PRIVATE, "private"),
    (ACC_PROTECTED, "protected"),
    (ACC_STATIC, "static"),
    (ACC_FINAL, "final"),
    (ACC_INTERFACE, "interface"),
    (ACC_ABSTRACT, "abstract"),
    (ACC_ANNOTATION, "annotation"),
    (ACC_ENUM, "enum"),
];

const FIELD_FLAGS: [(u16, &str); 8] = [
    (ACC_PUBLIC, "public"),
    (ACC_PRIVATE, "private"),
    (ACC_PROTECTED, "protected"),
    (ACC_STATIC, "static"),
    (ACC_FINAL, "final"),
    (ACC_VOLATILE, "volatile"),
    (ACC_TRANSIENT, "transient"),
    (ACC_ENUM, "enum"),
];

const METHOD_FLAGS: [(u16, &str); 11] = [
    (ACC_PUBLIC, "public"),
    (ACC_PRIVATE, "private"),
    (ACC_PROTECTED, "protected"),
    (ACC_STATIC, "static"),
    (ACC_FINAL, "final"),
    (ACC_SYNCHRONIZED, "synchronized"),
    (ACC_BRIDGE, "bridge"),
    (ACC_VARARGS, "varargs"),
    (ACC_NATIVE, "native"),
    (ACC_ABSTRACT, "abstract"),
    (ACC_STRICT, "strictfp"),
];

/// Smali keywords for class access flags.
pub(crate) fn class_keywords(flags: u16) -> Vec<&'static str> {
    keywords(flags, &CLASS_FLAGS)
}

/// Smali keywords for field access flags.
pub(crate) fn field_keywords(flags: u16) -> Vec<&'static str> {
    keywords(flags, &FIELD_FLAGS)
}

/// Smali keywords for method access flags.
pub(crate) fn method_keywords(flags: u16) -> Vec<&'static str> {
    keywords(flags, &METHOD_FLAGS)
}

/// Java source modifiers, which omit the Smali-only bridge/varargs markers.
pub(crate) fn java_method_modifiers(flags: u16) -> Vec<&'static str> {
    method_keywords(flags & !(ACC_BRIDGE | ACC_VARARGS))
}

pub(crate) fn java_field_modifiers(flags: u16) -> Vec<&'static str> {
    field_keywords(flags & !ACC_ENUM)
}

fn keywords(flags: u16, table: &[(u16, &'static str)]) -> Vec<&'static str> {
    table
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, keyword)| *keyword)
        .collect()
}

pub(crate) fn is_static(flags: u16) -> bool {
    flags & ACC_STATIC != 0
}

pub(crate) fn is_interface(flags: u16) -> bool {
    flags & ACC_INTERFACE != 0
}

pub(crate) fn is_synthetic(flags: u16) -> bool {
    flags & ACC_SYNTHETIC != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_keywords_follow_declaration_order() {
        let flags = ACC_PUBLIC | ACC_STATIC | ACC_FINAL | ACC_VARARGS;

        assert_eq!(
            method_keywords(flags),
            vec!["public", "static", "final", "varargs"]
        );
        assert_eq!(java_method_modifiers(flags), vec!["public", "static", "final"]);
    }

    #[test]
    fn shared_bits_resolve_by_member_kind() {
        assert_eq!(field_keywords(ACC_VOLATILE), vec!["volatile"]);
        assert_eq!(method_keywords(ACC_BRIDGE), vec!["bridge"]);
    }
}
