// Copyright 2018 The dirwatch Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ownership of installed audit rules.
//!
//! A [`Watch`] is the leaf: it owns the rule(s) installed for one file
//! or directory and removes them when dropped. A [`DirectoryWatch`]
//! mirrors a directory: its own Watch, a Watch per regular file, and a
//! child DirectoryWatch per subdirectory. The tree grows and shrinks as
//! create and delete events arrive; dropping any node releases every
//! rule beneath it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::rc::Rc;

use log::warn;

use dirwatch_audit::{AuditSource, WatchRule};
use dirwatch_audit::{PERM_ATTR, PERM_EXEC, PERM_READ, PERM_WRITE};

use crate::error::Error;
use crate::paths::PathParts;

/// Shared handle to the audit source.
///
/// The daemon is single threaded; borrows are taken one pipeline step
/// at a time, so the `RefCell` can never be contended.
pub type SourceRef = Rc<RefCell<dyn AuditSource>>;

/// The errors that can occur navigating or mutating the watch tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The path does not start with this node's path.
    NotAPrefix(String),
    /// A relative path descends through a directory this node is not
    /// watching.
    ChildNotFound(String),
    /// The path names something that is neither a regular file nor a
    /// directory.
    InvalidKind(String),
    /// An operation that needs at least one path component got none.
    EmptyPath,
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TreeError::NotAPrefix(ref path) => {
                write!(f, "{} is outside this watch", path)
            }
            TreeError::ChildNotFound(ref name) => {
                write!(f, "no watched subdirectory '{}'", name)
            }
            TreeError::InvalidKind(ref path) => {
                write!(f, "{} is neither a regular file nor a directory", path)
            }
            TreeError::EmptyPath => write!(f, "empty relative path"),
        }
    }
}

/// Owner of the audit rules installed for one filesystem object.
///
/// Creation is all or nothing: if any rule fails to install, the ones
/// already installed are removed before the error is returned. Dropping
/// a Watch removes its rules; removal failures are logged and swallowed
/// because drop runs on teardown paths that must not fail.
pub struct Watch {
    rules: Vec<WatchRule>,
    source: SourceRef,
}

impl Watch {
    /// Installs the rule set for `path`: a single write-class rule for
    /// a directory, or read/write/execute/attribute rules for a file.
    pub fn create(source: SourceRef, path: &str, is_directory: bool) -> Result<Watch, Error> {
        let mut watch = Watch { rules: Vec::new(), source };
        watch.add_rule(path, is_directory, PERM_WRITE, 'w')?;
        if !is_directory {
            watch.add_rule(path, false, PERM_READ, 'r')?;
            watch.add_rule(path, false, PERM_EXEC, 'x')?;
            watch.add_rule(path, false, PERM_ATTR, 'a')?;
        }
        Ok(watch)
    }

    fn add_rule(
        &mut self,
        path: &str,
        directory: bool,
        permissions: u32,
        class: char,
    ) -> Result<(), Error> {
        let rule = WatchRule {
            path: path.to_string(),
            directory,
            permissions,
            key: format!("{}{}", class, path),
        };
        self.source.borrow_mut().install_rule(&rule)?;
        self.rules.push(rule);
        Ok(())
    }

    /// How many rules this watch holds installed.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        let mut source = self.source.borrow_mut();
        for rule in &self.rules {
            if let Err(e) = source.remove_rule(rule) {
                warn!("failed to remove audit rule {}: {}", rule.key, e);
            }
        }
    }
}

/// A node of the watch tree, mirroring one directory.
pub struct DirectoryWatch {
    path: String,
    parts: PathParts,
    watch: Watch,
    files: BTreeMap<String, Watch>,
    dirs: BTreeMap<String, DirectoryWatch>,
    source: SourceRef,
}

impl DirectoryWatch {
    /// Watches `path` and, recursively, everything under it. Any
    /// failure unwinds the partial tree, releasing its rules.
    pub fn create(source: SourceRef, path: &str) -> Result<DirectoryWatch, Error> {
        let watch = Watch::create(source.clone(), path, true)?;
        let mut node = DirectoryWatch {
            path: path.to_string(),
            parts: PathParts::parse(path),
            watch,
            files: BTreeMap::new(),
            dirs: BTreeMap::new(),
            source: source.clone(),
        };

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                // a name that isn't UTF-8 can never match audit record text
                Err(_) => continue,
            };
            let file_type = entry.file_type()?;
            let full = format!("{}/{}", path, name);
            if file_type.is_file() {
                let watch = Watch::create(source.clone(), &full, false)?;
                node.files.insert(name, watch);
            } else if file_type.is_dir() {
                let child = DirectoryWatch::create(source.clone(), &full)?;
                node.dirs.insert(name, child);
            }
        }

        Ok(node)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether `path` falls under this node.
    pub fn contains(&self, path: &PathParts) -> bool {
        path.try_strip_prefix(&self.parts).is_some()
    }

    /// `path` relative to this node.
    pub fn rel_path(&self, path: &PathParts) -> Result<PathParts, Error> {
        path.try_strip_prefix(&self.parts)
            .ok_or_else(|| TreeError::NotAPrefix(path.render(true)).into())
    }

    /// Starts watching the object at `rel`, which must name an
    /// existing regular file or directory one level at a time below an
    /// already watched chain. Watching an already watched leaf is a
    /// no-op.
    pub fn watch_path(&mut self, rel: &PathParts) -> Result<(), Error> {
        let (name, rest) = match rel.parts().split_first() {
            Some(pair) => pair,
            None => return Err(TreeError::EmptyPath.into()),
        };

        if rest.is_empty() {
            if self.files.contains_key(name) || self.dirs.contains_key(name) {
                return Ok(());
            }
            let full = format!("{}/{}", self.path, name);
            let meta = fs::metadata(&full)?;
            if meta.is_dir() {
                let child = DirectoryWatch::create(self.source.clone(), &full)?;
                self.dirs.insert(name.clone(), child);
            } else if meta.is_file() {
                let watch = Watch::create(self.source.clone(), &full, false)?;
                self.files.insert(name.clone(), watch);
            } else {
                return Err(TreeError::InvalidKind(full).into());
            }
            return Ok(());
        }

        match self.dirs.get_mut(name) {
            Some(child) => child.watch_path(&rel.child_path()),
            None => Err(TreeError::ChildNotFound(name.clone()).into()),
        }
    }

    /// Stops watching the leaf at `rel`, dropping its whole subtree and
    /// releasing the rules beneath it. Unwatching a leaf that isn't
    /// there succeeds quietly.
    pub fn unwatch_path(&mut self, rel: &PathParts) -> Result<(), Error> {
        let (name, rest) = match rel.parts().split_first() {
            Some(pair) => pair,
            None => return Err(TreeError::EmptyPath.into()),
        };

        if rest.is_empty() {
            self.files.remove(name);
            self.dirs.remove(name);
            return Ok(());
        }

        match self.dirs.get_mut(name) {
            Some(child) => child.unwatch_path(&rel.child_path()),
            None => Err(TreeError::ChildNotFound(name.clone()).into()),
        }
    }

    /// Total rules installed for this subtree.
    pub fn rule_count(&self) -> usize {
        self.watch.rule_count()
            + self.files.values().map(Watch::rule_count).sum::<usize>()
            + self.dirs.values().map(DirectoryWatch::rule_count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use tempdir::TempDir;

    use dirwatch_audit::test_utils::ScriptedSource;

    use super::*;
    use crate::error::Error;

    fn scripted() -> (Rc<RefCell<ScriptedSource>>, SourceRef) {
        let source = Rc::new(RefCell::new(ScriptedSource::new()));
        let as_trait: SourceRef = source.clone();
        (source, as_trait)
    }

    fn touch(path: &str) {
        let mut f = File::create(path).expect("failed to create file");
        f.write_all(b"x").expect("failed to write file");
    }

    /// tmp/
    ///   one.txt
    ///   two.txt
    ///   sub/
    ///     three.txt
    fn fixture() -> TempDir {
        let tmp = TempDir::new("dirwatch-test").expect("failed to create temp dir");
        let root = tmp.path().to_str().unwrap().to_string();
        touch(&format!("{}/one.txt", root));
        touch(&format!("{}/two.txt", root));
        fs::create_dir(format!("{}/sub", root)).unwrap();
        touch(&format!("{}/sub/three.txt", root));
        tmp
    }

    #[test]
    fn create_mirrors_the_directory() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (source, as_trait) = scripted();

        let tree = DirectoryWatch::create(as_trait, root).unwrap();
        // 1 rule per directory (root, sub), 4 per file (one, two, three)
        assert_eq!(tree.rule_count(), 2 + 3 * 4);
        assert_eq!(source.borrow().live_rules().len(), 14);
        assert!(source.borrow().has_rule(&format!("w{}", root)));
        assert!(source.borrow().has_rule(&format!("w{}/sub", root)));
        assert!(source.borrow().has_rule(&format!("r{}/sub/three.txt", root)));
        assert!(source.borrow().has_rule(&format!("a{}/one.txt", root)));
    }

    #[test]
    fn drop_releases_every_rule() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (source, as_trait) = scripted();

        let tree = DirectoryWatch::create(as_trait, root).unwrap();
        drop(tree);
        assert!(source.borrow().live_rules().is_empty());
        assert_eq!(source.borrow().removal_count(), 14);
    }

    #[test]
    fn failed_create_is_all_or_nothing() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (source, as_trait) = scripted();
        // enough for the root watch and one file, then fail
        source.borrow_mut().fail_install_after(5);

        assert!(DirectoryWatch::create(as_trait, root).is_err());
        assert!(source.borrow().live_rules().is_empty());
    }

    #[test]
    fn watch_path_adds_a_file_leaf() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (source, as_trait) = scripted();
        let mut tree = DirectoryWatch::create(as_trait, root).unwrap();

        touch(&format!("{}/new.txt", root));
        tree.watch_path(&PathParts::parse("new.txt")).unwrap();
        assert!(source.borrow().has_rule(&format!("x{}/new.txt", root)));
        assert_eq!(tree.rule_count(), 14 + 4);
    }

    #[test]
    fn watch_path_adds_a_directory_recursively() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (source, as_trait) = scripted();
        let mut tree = DirectoryWatch::create(as_trait, root).unwrap();

        fs::create_dir(format!("{}/fresh", root)).unwrap();
        touch(&format!("{}/fresh/inner.txt", root));
        tree.watch_path(&PathParts::parse("fresh")).unwrap();
        assert!(source.borrow().has_rule(&format!("w{}/fresh", root)));
        assert!(source.borrow().has_rule(&format!("r{}/fresh/inner.txt", root)));
        assert_eq!(tree.rule_count(), 14 + 1 + 4);
    }

    #[test]
    fn watch_path_is_idempotent() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (source, as_trait) = scripted();
        let mut tree = DirectoryWatch::create(as_trait, root).unwrap();

        let installs = source.borrow().install_count();
        tree.watch_path(&PathParts::parse("one.txt")).unwrap();
        tree.watch_path(&PathParts::parse("sub")).unwrap();
        assert_eq!(source.borrow().install_count(), installs);
    }

    #[test]
    fn watch_path_descends_into_children() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (source, as_trait) = scripted();
        let mut tree = DirectoryWatch::create(as_trait, root).unwrap();

        touch(&format!("{}/sub/four.txt", root));
        tree.watch_path(&PathParts::parse("sub/four.txt")).unwrap();
        assert!(source.borrow().has_rule(&format!("w{}/sub/four.txt", root)));
    }

    #[test]
    fn watch_path_unknown_child_fails() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (_source, as_trait) = scripted();
        let mut tree = DirectoryWatch::create(as_trait, root).unwrap();

        match tree.watch_path(&PathParts::parse("ghost/file")) {
            Err(Error::Tree(TreeError::ChildNotFound(name))) => assert_eq!(name, "ghost"),
            other => panic!("expected ChildNotFound, got {:?}", other),
        }
    }

    #[test]
    fn empty_rel_path_fails() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (_source, as_trait) = scripted();
        let mut tree = DirectoryWatch::create(as_trait, root).unwrap();

        match tree.watch_path(&PathParts::parse("")) {
            Err(Error::Tree(TreeError::EmptyPath)) => (),
            other => panic!("expected EmptyPath, got {:?}", other),
        }
    }

    #[test]
    fn unwatch_path_releases_the_subtree() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (source, as_trait) = scripted();
        let mut tree = DirectoryWatch::create(as_trait, root).unwrap();

        tree.unwatch_path(&PathParts::parse("sub")).unwrap();
        assert_eq!(tree.rule_count(), 14 - 5);
        assert!(!source.borrow().has_rule(&format!("w{}/sub", root)));
        assert!(!source.borrow().has_rule(&format!("r{}/sub/three.txt", root)));
    }

    #[test]
    fn unwatch_missing_leaf_is_a_quiet_success() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (source, as_trait) = scripted();
        let mut tree = DirectoryWatch::create(as_trait, root).unwrap();

        tree.unwatch_path(&PathParts::parse("never-was")).unwrap();
        assert_eq!(source.borrow().live_rules().len(), 14);
    }

    #[test]
    fn contains_and_rel_path() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (_source, as_trait) = scripted();
        let tree = DirectoryWatch::create(as_trait, root).unwrap();
        assert_eq!(tree.path(), root);

        let inside = PathParts::parse(&format!("{}/sub/three.txt", root));
        assert!(tree.contains(&inside));
        let rel = tree.rel_path(&inside).unwrap();
        assert_eq!(rel.render(false), "sub/three.txt");

        let outside = PathParts::parse("/somewhere/else");
        assert!(!tree.contains(&outside));
        assert!(tree.rel_path(&outside).is_err());
    }

    #[test]
    fn create_and_delete_round_trip() {
        let tmp = fixture();
        let root = tmp.path().to_str().unwrap();
        let (source, as_trait) = scripted();
        let mut tree = DirectoryWatch::create(as_trait, root).unwrap();

        fs::create_dir(format!("{}/sub/deep", root)).unwrap();
        tree.watch_path(&PathParts::parse("sub/deep")).unwrap();
        assert!(source.borrow().has_rule(&format!("w{}/sub/deep", root)));

        tree.unwatch_path(&PathParts::parse("sub/deep")).unwrap();
        assert!(!source.borrow().has_rule(&format!("w{}/sub/deep", root)));
        assert_eq!(tree.rule_count(), 14);
    }
}
