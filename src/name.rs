//! Classification of query names against the instance namespace.
//!
//! ```text
//! web1.novalocal            -> instance "web1", fixed addresses
//! fixed.web1.novalocal      -> instance "web1", fixed addresses
//! floating.web1.novalocal   -> instance "web1", floating addresses
//! novalocal, a.b.c.novalocal, public.web1.novalocal -> in scope, rejected
//! anything.else.example.com -> out of scope
//! ```

use crate::inventory::AddressRole;

/// Result of classifying a query name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryName<'a> {
    /// Does not end in the reserved suffix.
    OutOfScope,
    /// Ends in the reserved suffix but cannot name an instance.
    Invalid(InvalidName<'a>),
    /// Names an instance and the address role to return.
    Instance(InstanceQuery<'a>),
}

/// Why an in-scope name was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidName<'a> {
    /// Neither two nor three labels.
    LabelCount(usize),
    /// First of three labels is not `fixed` or `floating`.
    UnknownRole(&'a str),
}

/// A well-formed in-scope name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceQuery<'a> {
    /// Candidate instance name (second-to-last label).
    pub instance: &'a str,
    /// Address role selected by the name; `fixed` when omitted.
    pub role: AddressRole,
}

/// Split a presentation-form name into labels, dropping the empty root
/// label of a fully-qualified name.
pub fn split_labels(name: &str) -> Vec<&str> {
    let mut labels: Vec<&str> = name.split('.').collect();
    if labels.last() == Some(&"") {
        labels.pop();
    }
    labels
}

/// Classify `name` against `suffix`. The suffix comparison is exact and
/// case-sensitive, as is the role token.
pub fn parse_query_name<'a>(name: &'a str, suffix: &str) -> QueryName<'a> {
    let labels = split_labels(name);

    if labels.last() != Some(&suffix) {
        return QueryName::OutOfScope;
    }

    let (role_token, instance) = match labels.as_slice() {
        [instance, _] => ("fixed", *instance),
        [role, instance, _] => (*role, *instance),
        _ => return QueryName::Invalid(InvalidName::LabelCount(labels.len())),
    };

    match role_token.parse::<AddressRole>() {
        Ok(role) => QueryName::Instance(InstanceQuery { instance, role }),
        Err(()) => QueryName::Invalid(InvalidName::UnknownRole(role_token)),
    }
}
