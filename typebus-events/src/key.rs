//! Type keys identifying subscription buckets

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// How a handler receives its event.
///
/// Each qualifier is a separate bucket: a handler subscribed by value is
/// never invoked for an event published by reference, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qualifier {
    /// Handler receives its own clone of the event
    Value,
    /// Handlers receive `&mut E` in subscription order and may modify it
    Mut,
    /// Handlers receive `&E`
    Ref,
}

impl Qualifier {
    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Qualifier::Value => "value",
            Qualifier::Mut => "mut",
            Qualifier::Ref => "ref",
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(event type, qualifier)` pair that selects one registry bucket.
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    type_id: TypeId,
    type_name: &'static str,
    qualifier: Qualifier,
}

impl TypeKey {
    /// Key for event type `E` delivered with `qualifier`.
    pub fn of<E: 'static>(qualifier: Qualifier) -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            qualifier,
        }
    }

    /// Event type id.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Event type name, for diagnostics only.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Delivery qualifier.
    pub fn qualifier(&self) -> Qualifier {
        self.qualifier
    }
}

// type_name is not guaranteed unique, so identity ignores it
impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.qualifier == other.qualifier
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.qualifier.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.type_name, self.qualifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_qualifiers_are_distinct_keys() {
        let keys: HashSet<TypeKey> = [
            TypeKey::of::<i32>(Qualifier::Value),
            TypeKey::of::<i32>(Qualifier::Mut),
            TypeKey::of::<i32>(Qualifier::Ref),
            TypeKey::of::<i32>(Qualifier::Value),
        ]
        .into_iter()
        .collect();

        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_types_are_distinct_keys() {
        assert_ne!(
            TypeKey::of::<i32>(Qualifier::Value),
            TypeKey::of::<u32>(Qualifier::Value)
        );
    }

    #[test]
    fn test_display() {
        let key = TypeKey::of::<u8>(Qualifier::Ref);
        assert_eq!(key.to_string(), "u8[ref]");
        assert_eq!(key.type_name(), "u8");
    }
}
