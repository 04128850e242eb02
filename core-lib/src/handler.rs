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

//! The record pipeline.
//!
//! One `next_record()` call pulls a single raw record off the audit
//! source, parses it, and feeds it to the event accumulated under its
//! sequence number. When an event completes, its resolved paths are
//! attributed to the owning watch root, create and delete actions
//! reshape the tree, and one line per path is appended to the access
//! log. Errors while processing a completed event are logged and
//! swallowed; the stream must keep flowing.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;

use log::{error, info};

use dirwatch_audit::{Record, RecordKind};
use dirwatch_audit::{RECORD_TYPE_MAX, RECORD_TYPE_MIN};

use crate::config::Config;
use crate::error::Error;
use crate::event::{AccessType, Event};
use crate::paths::PathParts;
use crate::watch::{DirectoryWatch, SourceRef};

/// The daemon's working state: watch roots, in-flight events, and the
/// output log.
///
/// Field order matters on drop: the log closes before the watch tree
/// releases its rules.
pub struct EventHandler {
    source: SourceRef,
    output: Box<dyn Write>,
    watches: Vec<DirectoryWatch>,
    pending: BTreeMap<u64, Event>,
}

impl EventHandler {
    /// Opens the access log and builds one watch root per configured
    /// directory. Any failure unwinds the roots built so far.
    pub fn create(source: SourceRef, config: &Config) -> Result<EventHandler, Error> {
        let output = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.output_path)?;
        info!("appending access log to {}", config.output_path);

        let mut handler = EventHandler {
            source,
            watches: Vec::new(),
            pending: BTreeMap::new(),
            output: Box::new(output),
        };
        for dir in &config.dirs {
            handler.watch_directory(dir)?;
        }
        Ok(handler)
    }

    /// Builds a handler over pre-built roots and an arbitrary sink.
    ///
    /// This is exposed for testing purposes only.
    #[doc(hidden)]
    pub fn with_output(
        source: SourceRef,
        watches: Vec<DirectoryWatch>,
        output: Box<dyn Write>,
    ) -> EventHandler {
        EventHandler { source, watches, pending: BTreeMap::new(), output }
    }

    fn watch_directory(&mut self, path: &str) -> Result<(), Error> {
        let watch = DirectoryWatch::create(self.source.clone(), path)?;
        info!("watching {} ({} rules)", path, watch.rule_count());
        self.watches.push(watch);
        Ok(())
    }

    /// Pulls and dispatches one record. Blocks until the source yields.
    pub fn next_record(&mut self) -> Result<(), Error> {
        let raw = self.source.borrow_mut().read_record()?;

        // the source occasionally hands back frames that aren't audit
        // records at all
        if raw.type_code < RECORD_TYPE_MIN || raw.type_code > RECORD_TYPE_MAX {
            return Ok(());
        }

        let record = Record::parse(&raw.body)?;
        let kind = RecordKind::from_code(raw.type_code);
        let seq = record.sequence_number;

        let complete = match self.pending.entry(seq) {
            Entry::Occupied(mut entry) => entry.get_mut().absorb(kind, &record),
            Entry::Vacant(entry) => {
                if kind != RecordKind::Syscall {
                    // a record for an event this daemon never opened
                    return Ok(());
                }
                entry.insert(Event::default()).absorb(kind, &record)
            }
        };

        if complete {
            if let Some(event) = self.pending.remove(&seq) {
                if let Err(e) = self.process(&event) {
                    error!("error processing event {}: {}", seq, e);
                }
            }
        }
        Ok(())
    }

    /// Resolves a completed event and applies it: tree reconciliation
    /// for creates and deletes, then one log line per path.
    fn process(&mut self, event: &Event) -> Result<(), Error> {
        let actions = event.calculate_actions()?;
        for (path, action) in actions {
            let parts = PathParts::parse(&path);
            let root = match self.watches.iter_mut().find(|w| w.contains(&parts)) {
                Some(root) => root,
                // not under any watched root
                None => continue,
            };
            let rel = root.rel_path(&parts)?;
            match action {
                AccessType::Create => root.watch_path(&rel)?,
                AccessType::Delete => root.unwatch_path(&rel)?,
                _ => (),
            }
            writeln!(
                self.output,
                "{}\t{}\t{}\t{}\t{}",
                event.timestamp(),
                parts.render(true),
                action,
                event.pid(),
                event.uid()
            )?;
            self.output.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs::{self, File};
    use std::io::{self, Write};
    use std::rc::Rc;

    use tempdir::TempDir;

    use dirwatch_audit::test_utils::ScriptedSource;
    use dirwatch_audit::{AUDIT_CWD, AUDIT_EOE, AUDIT_PATH, AUDIT_SYSCALL};

    use super::*;

    /// A `Write` whose contents stay inspectable after the handler
    /// takes ownership.
    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        root: String,
        source: Rc<RefCell<ScriptedSource>>,
        sink: SharedSink,
        handler: EventHandler,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new("dirwatch-test").expect("failed to create temp dir");
        let root = tmp.path().to_str().unwrap().to_string();
        File::create(format!("{}/file.txt", root)).unwrap();

        let source = Rc::new(RefCell::new(ScriptedSource::new()));
        let as_trait: SourceRef = source.clone();
        let tree = DirectoryWatch::create(as_trait.clone(), &root).unwrap();
        let sink = SharedSink::default();
        let handler = EventHandler::with_output(as_trait, vec![tree], Box::new(sink.clone()));

        Fixture { _tmp: tmp, root, source, sink, handler }
    }

    /// Scripts the records of one complete event touching `name` with
    /// the given nametype.
    fn push_event(fx: &mut Fixture, seq: u64, nametype: &str, name: &str) {
        let mut source = fx.source.borrow_mut();
        source.push(
            AUDIT_SYSCALL,
            &format!("audit(1700000000.123:{}): key=\"w{}\" uid=1000 pid=77", seq, fx.root),
        );
        source.push(AUDIT_CWD, &format!("audit(1700000000.123:{}): cwd=\"/tmp\"", seq));
        source.push(
            AUDIT_PATH,
            &format!("audit(1700000000.123:{}): name=\"{}\" nametype={}", seq, name, nametype),
        );
        source.push(AUDIT_EOE, &format!("audit(1700000000.123:{}): ", seq));
    }

    fn drain(fx: &mut Fixture) {
        while fx.source.borrow().remaining_records() > 0 {
            if let Err(e) = fx.handler.next_record() {
                panic!("unexpected pipeline error: {}", e);
            }
        }
    }

    #[test]
    fn canonical_write_event_logs_one_line() {
        let mut fx = fixture();
        let file = format!("{}/file.txt", fx.root);
        push_event(&mut fx, 42, "NORMAL", &file);
        drain(&mut fx);
        assert_eq!(fx.sink.contents(), format!("1700000000\t{}\twrite\t77\t1000\n", file));
    }

    #[test]
    fn event_without_uid_is_discarded() {
        let mut fx = fixture();
        let file = format!("{}/file.txt", fx.root);
        {
            let mut source = fx.source.borrow_mut();
            source.push(AUDIT_SYSCALL, &format!("audit(5.0:9): key=\"w{}\" pid=77", fx.root));
            // the event completed on the syscall record, so these are
            // records for an event nobody is tracking any more
            source.push(AUDIT_PATH, &format!("audit(5.0:9): name=\"{}\" nametype=NORMAL", file));
            source.push(AUDIT_EOE, "audit(5.0:9): ");
        }
        drain(&mut fx);
        assert_eq!(fx.sink.contents(), "");
    }

    #[test]
    fn create_grows_the_tree() {
        let mut fx = fixture();
        let sub = format!("{}/sub", fx.root);
        fs::create_dir(&sub).unwrap();
        push_event(&mut fx, 43, "CREATE", &sub);
        drain(&mut fx);

        assert!(fx.source.borrow().has_rule(&format!("w{}", sub)));
        assert_eq!(fx.sink.contents(), format!("1700000000\t{}\tcreate\t77\t1000\n", sub));
    }

    #[test]
    fn delete_shrinks_the_tree() {
        let mut fx = fixture();
        let sub = format!("{}/sub", fx.root);
        fs::create_dir(&sub).unwrap();
        push_event(&mut fx, 43, "CREATE", &sub);
        push_event(&mut fx, 44, "DELETE", &sub);
        drain(&mut fx);

        assert!(!fx.source.borrow().has_rule(&format!("w{}", sub)));
        let expected = format!(
            "1700000000\t{sub}\tcreate\t77\t1000\n1700000000\t{sub}\tdelete\t77\t1000\n",
            sub = sub
        );
        assert_eq!(fx.sink.contents(), expected);
    }

    #[test]
    fn cwd_resolved_paths_outside_the_root_are_skipped() {
        let mut fx = fixture();
        // cwd in the scripted event is /tmp, outside the watched root
        push_event(&mut fx, 45, "NORMAL", "out.txt");
        drain(&mut fx);
        assert_eq!(fx.sink.contents(), "");
    }

    #[test]
    fn malformed_record_is_not_fatal() {
        let mut fx = fixture();
        let file = format!("{}/file.txt", fx.root);
        fx.source.borrow_mut().push(AUDIT_SYSCALL, "audit(x)");
        push_event(&mut fx, 46, "NORMAL", &file);

        assert!(fx.handler.next_record().is_err());
        drain(&mut fx);
        assert_eq!(fx.sink.contents(), format!("1700000000\t{}\twrite\t77\t1000\n", file));
    }

    #[test]
    fn garbage_type_codes_are_dropped() {
        let mut fx = fixture();
        fx.source.borrow_mut().push(2, "not even audit text");
        fx.source.borrow_mut().push(9999, "audit(5.0:50): a=1");
        assert!(fx.handler.next_record().is_ok());
        assert!(fx.handler.next_record().is_ok());
        assert_eq!(fx.sink.contents(), "");
    }

    #[test]
    fn records_for_unopened_events_are_skipped() {
        let mut fx = fixture();
        let file = format!("{}/file.txt", fx.root);
        fx.source
            .borrow_mut()
            .push(AUDIT_PATH, &format!("audit(5.0:60): name=\"{}\" nametype=NORMAL", file));
        fx.source.borrow_mut().push(AUDIT_EOE, "audit(5.0:60): ");
        drain(&mut fx);
        assert_eq!(fx.sink.contents(), "");
    }

    #[test]
    fn parent_entries_do_not_log() {
        let mut fx = fixture();
        let file = format!("{}/file.txt", fx.root);
        {
            let mut source = fx.source.borrow_mut();
            source.push(
                AUDIT_SYSCALL,
                &format!("audit(5.0:61): key=\"w{}\" uid=1 pid=2", fx.root),
            );
            source.push(
                AUDIT_PATH,
                &format!("audit(5.0:61): name=\"{}\" nametype=PARENT", fx.root),
            );
            source.push(
                AUDIT_PATH,
                &format!("audit(5.0:61): name=\"{}\" nametype=NORMAL", file),
            );
            source.push(AUDIT_EOE, "audit(5.0:61): ");
        }
        drain(&mut fx);
        assert_eq!(fx.sink.contents(), format!("5\t{}\twrite\t2\t1\n", file));
    }

    #[test]
    fn interleaved_events_complete_independently() {
        let mut fx = fixture();
        let file = format!("{}/file.txt", fx.root);
        {
            let mut source = fx.source.borrow_mut();
            source.push(
                AUDIT_SYSCALL,
                &format!("audit(5.0:70): key=\"w{}\" uid=1 pid=2", fx.root),
            );
            source.push(
                AUDIT_SYSCALL,
                &format!("audit(6.0:71): key=\"r{}\" uid=3 pid=4", fx.root),
            );
            source.push(
                AUDIT_PATH,
                &format!("audit(6.0:71): name=\"{}\" nametype=NORMAL", file),
            );
            source.push(
                AUDIT_PATH,
                &format!("audit(5.0:70): name=\"{}\" nametype=NORMAL", file),
            );
            // 71 finishes before 70: log order follows completion order
            source.push(AUDIT_EOE, "audit(6.0:71): ");
            source.push(AUDIT_EOE, "audit(5.0:70): ");
        }
        drain(&mut fx);
        let expected = format!("6\t{file}\tread\t4\t3\n5\t{file}\twrite\t2\t1\n", file = file);
        assert_eq!(fx.sink.contents(), expected);
    }

    #[test]
    fn paths_outside_every_root_are_skipped() {
        let mut fx = fixture();
        push_event(&mut fx, 80, "NORMAL", "/somewhere/else.txt");
        drain(&mut fx);
        assert_eq!(fx.sink.contents(), "");
    }

    #[test]
    fn log_lines_normalize_the_path() {
        let mut fx = fixture();
        let messy = format!("{}//./file.txt", fx.root);
        let clean = format!("{}/file.txt", fx.root);
        push_event(&mut fx, 81, "NORMAL", &messy);
        drain(&mut fx);
        assert_eq!(fx.sink.contents(), format!("1700000000\t{}\twrite\t77\t1000\n", clean));
    }
}
