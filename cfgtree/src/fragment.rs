/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Typed configuration fragments.
//!
//! The source builds a reflective composite struct at runtime to
//! deserialize the configuration tree. Here every owner instead registers a
//! concrete [`FragmentSpec`] type; [`TypedFragment`] erases it behind the
//! object-safe [`Fragment`] trait so the tree can store heterogeneous
//! fragments in one map without any runtime type-building.

use std::any::Any;
use std::fmt::Debug;

/// Implemented by the structured value an owner registers under a path.
/// `Validate` and `Describe` are the two fragment-level hooks named in the
/// public contract; both have a sensible default so simple fragments need
/// not override them.
pub trait FragmentSpec:
    serde::Serialize
    + serde::de::DeserializeOwned
    + Default
    + Clone
    + Debug
    + Send
    + Sync
    + 'static
{
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{:?}", self)
    }
}

/// Object-safe, type-erased fragment stored in the tree.
pub trait Fragment: Send + Sync + Debug {
    fn reset(&mut self);
    fn validate(&self) -> Result<(), String>;
    fn describe(&self) -> String;
    fn to_yaml(&self) -> serde_yaml::Value;
    fn apply_yaml(&mut self, doc: &serde_yaml::Value) -> Result<(), String>;
    fn clone_box(&self) -> Box<dyn Fragment>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Debug, Clone)]
pub struct TypedFragment<T: FragmentSpec>(pub T);

impl<T: FragmentSpec> TypedFragment<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T: FragmentSpec> Fragment for TypedFragment<T> {
    fn reset(&mut self) {
        self.0 = T::default();
    }

    fn validate(&self) -> Result<(), String> {
        self.0.validate()
    }

    fn describe(&self) -> String {
        self.0.describe()
    }

    fn to_yaml(&self) -> serde_yaml::Value {
        serde_yaml::to_value(&self.0).unwrap_or(serde_yaml::Value::Null)
    }

    fn apply_yaml(&mut self, doc: &serde_yaml::Value) -> Result<(), String> {
        let parsed: T = serde_yaml::from_value(doc.clone()).map_err(|e| e.to_string())?;
        self.0 = parsed;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Fragment> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        &mut self.0
    }
}

pub fn boxed<T: FragmentSpec>(value: T) -> Box<dyn Fragment> {
    Box::new(TypedFragment::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct Example {
        level: String,
    }

    impl FragmentSpec for Example {
        fn validate(&self) -> Result<(), String> {
            if self.level.is_empty() {
                Err("level must not be empty".into())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn apply_yaml_replaces_value() {
        let mut f = TypedFragment::new(Example::default());
        f.apply_yaml(&serde_yaml::to_value(Example { level: "debug".into() }).unwrap())
            .unwrap();
        assert_eq!(f.0.level, "debug");
    }

    #[test]
    fn validate_delegates_to_inner_type() {
        let f = TypedFragment::new(Example { level: "".into() });
        assert!(f.validate().is_err());
    }

    #[test]
    fn reset_restores_default() {
        let mut f = TypedFragment::new(Example { level: "debug".into() });
        f.reset();
        assert_eq!(f.0.level, "");
    }
}
