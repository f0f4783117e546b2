// Common test utilities for integration tests
//
// Shared fixtures for the association and exception trap suites.

#![allow(dead_code)]

use oxibridge::{Class, Copying, Object, UserInfo};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the class registered under `name`, registering it on first use.
///
/// Integration tests in one binary share the class registry, and several
/// threads may race to register the same fixture class.
pub fn test_class(name: &str) -> Class {
    Class::new_root(name)
        .ok()
        .or_else(|| Class::named(name))
        .expect("Failed to create test class")
}

/// Creates a fresh instance of the class registered under `name`.
pub fn test_object(class_name: &str) -> Object {
    Object::new(&test_class(class_name)).expect("Failed to create test object")
}

/// Builds user info from literal pairs.
pub fn user_info(pairs: &[(&str, &str)]) -> UserInfo {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// A value with interior mutability, so "mutating the original" is
/// observable after a set.
#[derive(Debug)]
pub struct Note(Mutex<String>);

impl Note {
    pub fn new(text: &str) -> Self {
        Note(Mutex::new(text.to_string()))
    }

    pub fn text(&self) -> String {
        self.0.lock().unwrap().clone()
    }

    pub fn set_text(&self, text: &str) {
        *self.0.lock().unwrap() = text.to_string();
    }
}

impl Copying for Note {
    fn copy(&self) -> Self {
        Note::new(&self.text())
    }
}

/// Counts drops of values tagged with a shared counter.
#[derive(Debug)]
pub struct DropCounter(pub &'static AtomicUsize);

impl Copying for DropCounter {
    fn copy(&self) -> Self {
        DropCounter(self.0)
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
