//! Event type hierarchy.
//!
//! Event types are plain names arranged in a directed acyclic "is-subtype-of"
//! graph. A type may have several parents. The full ancestor set of every
//! type is computed once at build time, so subtype checks during dispatch are
//! a set lookup.

use crate::error::DispatchError;
use std::collections::{BTreeMap, BTreeSet};

/// Immutable event type hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeHierarchy {
  parents: BTreeMap<String, Vec<String>>,
  // Each entry includes the type itself.
  ancestors: BTreeMap<String, BTreeSet<String>>,
}

impl TypeHierarchy {
  /// Starts building a hierarchy.
  pub fn builder() -> TypeHierarchyBuilder {
    TypeHierarchyBuilder::default()
  }

  /// Returns true if `ty` is `ancestor` or one of its descendants.
  ///
  /// Unknown types are subtypes of nothing.
  pub fn is_subtype_of(&self, ty: &str, ancestor: &str) -> bool {
    self
      .ancestors
      .get(ty)
      .is_some_and(|set| set.contains(ancestor))
  }

  /// Returns true if the type is declared.
  pub fn contains(&self, ty: &str) -> bool {
    self.parents.contains_key(ty)
  }

  /// Declared types in name order.
  pub fn types(&self) -> impl Iterator<Item = &str> {
    self.parents.keys().map(String::as_str)
  }

  /// Direct parents of a type.
  pub fn parents(&self, ty: &str) -> Option<&[String]> {
    self.parents.get(ty).map(Vec::as_slice)
  }

  /// The type and all of its ancestors.
  pub fn ancestors(&self, ty: &str) -> Option<&BTreeSet<String>> {
    self.ancestors.get(ty)
  }
}

/// Builder for [`TypeHierarchy`].
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchyBuilder {
  declared: Vec<(String, Vec<String>)>,
}

impl TypeHierarchyBuilder {
  /// Declares a type without parents.
  #[must_use]
  pub fn root(self, name: impl Into<String>) -> Self {
    self.declare(name, Vec::<String>::new())
  }

  /// Declares a type with its direct parents.
  #[must_use]
  pub fn declare<I, S>(mut self, name: impl Into<String>, parents: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .declared
      .push((name.into(), parents.into_iter().map(Into::into).collect()));
    self
  }

  /// Validates the declarations and computes ancestor sets.
  ///
  /// # Errors
  ///
  /// `InvalidHierarchy` for a type declared twice, a parent that is never
  /// declared, or a cycle.
  pub fn build(self) -> Result<TypeHierarchy, DispatchError> {
    let mut parents: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, declared_parents) in self.declared {
      if parents.contains_key(&name) {
        return Err(DispatchError::InvalidHierarchy(format!(
          "type [{}] is declared more than once",
          name
        )));
      }
      parents.insert(name, declared_parents);
    }
    for (name, declared_parents) in &parents {
      if let Some(missing) = declared_parents.iter().find(|p| !parents.contains_key(*p)) {
        return Err(DispatchError::InvalidHierarchy(format!(
          "type [{}] extends undeclared type [{}]",
          name, missing
        )));
      }
    }

    let mut ancestors = BTreeMap::new();
    let mut visiting = BTreeSet::new();
    for name in parents.keys() {
      collect_ancestors(name, &parents, &mut ancestors, &mut visiting)?;
    }
    Ok(TypeHierarchy { parents, ancestors })
  }
}

fn collect_ancestors(
  name: &str,
  parents: &BTreeMap<String, Vec<String>>,
  done: &mut BTreeMap<String, BTreeSet<String>>,
  visiting: &mut BTreeSet<String>,
) -> Result<BTreeSet<String>, DispatchError> {
  if let Some(set) = done.get(name) {
    return Ok(set.clone());
  }
  if !visiting.insert(name.to_string()) {
    return Err(DispatchError::InvalidHierarchy(format!(
      "type [{}] is its own ancestor",
      name
    )));
  }
  let mut set = BTreeSet::from([name.to_string()]);
  for parent in parents.get(name).into_iter().flatten() {
    set.extend(collect_ancestors(parent, parents, done, visiting)?);
  }
  visiting.remove(name);
  done.insert(name.to_string(), set.clone());
  Ok(set)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn events() -> TypeHierarchy {
    TypeHierarchy::builder()
      .root("Event")
      .declare("Event1", ["Event"])
      .declare("Event1a", ["Event1"])
      .declare("Event2", ["Event"])
      .build()
      .unwrap()
  }

  #[test]
  fn test_subtype_is_reflexive_and_transitive() {
    let hierarchy = events();
    assert!(hierarchy.is_subtype_of("Event1", "Event1"));
    assert!(hierarchy.is_subtype_of("Event1a", "Event1"));
    assert!(hierarchy.is_subtype_of("Event1a", "Event"));
    assert!(!hierarchy.is_subtype_of("Event1", "Event1a"));
    assert!(!hierarchy.is_subtype_of("Event2", "Event1"));
    assert!(!hierarchy.is_subtype_of("Unknown", "Event"));
  }

  #[test]
  fn test_multiple_parents() {
    let hierarchy = TypeHierarchy::builder()
      .root("Event")
      .declare("Clicked", ["Event"])
      .declare("Logged", ["Event"])
      .declare("AuditedClick", ["Clicked", "Logged"])
      .build()
      .unwrap();
    let ancestors = hierarchy.ancestors("AuditedClick").unwrap();
    assert_eq!(ancestors.len(), 4);
    assert!(hierarchy.is_subtype_of("AuditedClick", "Logged"));
    assert_eq!(hierarchy.parents("AuditedClick").unwrap().len(), 2);
  }

  #[test]
  fn test_types_are_sorted() {
    let hierarchy = events();
    let types: Vec<&str> = hierarchy.types().collect();
    assert_eq!(types, vec!["Event", "Event1", "Event1a", "Event2"]);
    assert!(hierarchy.contains("Event1a"));
    assert!(!hierarchy.contains("Event3"));
  }

  #[test]
  fn test_rejects_undeclared_parent() {
    let err = TypeHierarchy::builder()
      .declare("Event1", ["Event"])
      .build()
      .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidHierarchy(_)));
  }

  #[test]
  fn test_rejects_duplicate_declaration() {
    let err = TypeHierarchy::builder()
      .root("Event")
      .root("Event")
      .build()
      .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidHierarchy(_)));
  }

  #[test]
  fn test_rejects_cycle() {
    let err = TypeHierarchy::builder()
      .declare("A", ["B"])
      .declare("B", ["C"])
      .declare("C", ["A"])
      .build()
      .unwrap_err();
    assert!(err.to_string().contains("own ancestor"));
  }
}
