use std::path::{Path, PathBuf};

use log::{debug, error};

use super::{DumpError, DumpEvent, DumpRecord, DumpWriter, PeerHeader};
use crate::utils::Timestamp;

/// Per-peer recording rotation.
///
/// Events land in `<root>/<peer address>/temp.dump`. When an event or timer tick
/// falls into a new `interval` bucket the open file gets its footer and is renamed
/// after the bucket it covered (`YYYYMMDDHHMMSS`, UTC). A new file is only started
/// while the peer session is active. Recording failures are logged, never returned.
#[derive(Debug)]
pub struct Recorder {
    dir: PathBuf,
    interval: u64,
    identity: PeerHeader,
    current: Option<DumpWriter>,
    bucket: Option<u64>,
    /// Bucket in which opening or writing a file failed, not retried until the next one
    failed_bucket: Option<u64>,
}

impl Recorder {
    pub fn new(root: &Path, interval: u64, identity: PeerHeader) -> Self {
        Self {
            dir: root.join(identity.address.to_string()),
            interval,
            identity,
            current: None,
            bucket: None,
            failed_bucket: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Close the file of a finished bucket and start one for the current bucket
    pub fn check(&mut self, now: Timestamp, active: bool) {
        let bucket = now.bucket(self.interval);
        if self.current.is_some() && self.bucket != Some(bucket) {
            self.finish_current(now);
        }
        if self.current.is_none() && active && self.failed_bucket != Some(bucket) {
            self.open(bucket, now);
        }
    }

    pub fn record(&mut self, event: DumpEvent, now: Timestamp, active: bool) {
        self.check(now, active);
        let writer = match self.current.as_mut() {
            Some(writer) => writer,
            None => return,
        };
        match writer.write(&DumpRecord::new(now, event)) {
            Ok(()) => (),
            // Nothing reached the file, it stays usable
            Err(err @ (DumpError::RecordTooLarge(_) | DumpError::Malformed(_))) => {
                error!("{} record not written: {}", self.identity.address, err)
            }
            Err(err) => {
                error!(
                    "{} error writing recording in {}: {}",
                    self.identity.address,
                    self.dir.display(),
                    err
                );
                self.failed_bucket = self.bucket;
                self.finish_current(now);
            }
        }
    }

    /// Write the footer and close the open file, if any
    pub fn close(&mut self, now: Timestamp) {
        self.finish_current(now);
    }

    fn open(&mut self, bucket: u64, now: Timestamp) {
        let header = DumpRecord::new(now, DumpEvent::Header(self.identity));
        let opened = DumpWriter::create(&self.dir, bucket).and_then(|mut writer| {
            writer.write(&header)?;
            Ok(writer)
        });
        match opened {
            Ok(writer) => {
                debug!(
                    "{} recording started in {}",
                    self.identity.address,
                    self.dir.display()
                );
                self.current = Some(writer);
                self.bucket = Some(bucket);
            }
            Err(err) => {
                error!(
                    "{} unable to start recording in {}: {}",
                    self.identity.address,
                    self.dir.display(),
                    err
                );
                self.failed_bucket = Some(bucket);
            }
        }
    }

    fn finish_current(&mut self, now: Timestamp) {
        let mut writer = match self.current.take() {
            Some(writer) => writer,
            None => return,
        };
        if let Err(err) = writer.write(&DumpRecord::new(now, DumpEvent::Footer)) {
            error!("{} error writing footer: {}", self.identity.address, err);
        }
        match writer.finish() {
            Ok(Some(path)) => debug!(
                "{} recording saved as {}",
                self.identity.address,
                path.display()
            ),
            Ok(None) => debug!("{} empty recording discarded", self.identity.address),
            Err(err) => error!(
                "{} error closing recording in {}: {}",
                self.identity.address,
                self.dir.display(),
                err
            ),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.current.is_some() {
            self.close(Timestamp::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::{Announce, DumpReader, TEMP_FILE_NAME};
    use crate::models::{Community, Origin, Relationship};
    use std::fs;
    use std::io::BufWriter;

    fn identity() -> PeerHeader {
        PeerHeader {
            address: "192.0.2.2".parse().unwrap(),
            asn: 65001,
            relationship: Relationship::External,
        }
    }

    fn at(seconds: u64) -> Timestamp {
        Timestamp::new(seconds, 0)
    }

    fn events(path: &Path) -> Vec<DumpEvent> {
        DumpReader::open(path)
            .unwrap()
            .map(|r| r.unwrap().event)
            .collect()
    }

    #[test]
    fn test_rotation_on_event() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(root.path(), 60, identity());
        recorder.record(DumpEvent::Open, at(100), true);
        assert!(recorder.dir().join(TEMP_FILE_NAME).exists());
        recorder.record(DumpEvent::Keepalive, at(130), true);
        recorder.record(DumpEvent::Close, at(131), true);
        recorder.close(at(131));
        assert!(!recorder.is_open());

        let dir = root.path().join("192.0.2.2");
        assert_eq!(
            events(&dir.join("19700101000100")),
            vec![
                DumpEvent::Header(identity()),
                DumpEvent::Open,
                DumpEvent::Footer
            ]
        );
        assert_eq!(
            events(&dir.join("19700101000200")),
            vec![
                DumpEvent::Header(identity()),
                DumpEvent::Keepalive,
                DumpEvent::Close,
                DumpEvent::Footer
            ]
        );
        assert!(!dir.join(TEMP_FILE_NAME).exists());
    }

    #[test]
    fn test_idle_rotation_discards_empty_file() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(root.path(), 60, identity());
        recorder.record(DumpEvent::Keepalive, at(100), true);
        recorder.check(at(110), true);
        assert!(recorder.is_open());
        recorder.check(at(185), true);
        assert!(recorder.is_open());
        recorder.close(at(190));

        let dir = root.path().join("192.0.2.2");
        let names: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["19700101000100".to_string()]);
    }

    #[test]
    fn test_inactive_peer_records_nothing() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(root.path(), 60, identity());
        recorder.record(DumpEvent::Keepalive, at(100), false);
        recorder.check(at(200), false);
        assert!(!recorder.is_open());
        assert!(!root.path().join("192.0.2.2").exists());
    }

    #[test]
    fn test_rotation_stops_when_inactive() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(root.path(), 60, identity());
        recorder.record(DumpEvent::Open, at(100), true);
        recorder.check(at(130), false);
        assert!(!recorder.is_open());
        assert!(root.path().join("192.0.2.2/19700101000100").exists());
    }

    #[test]
    fn test_unwritable_root() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();
        let mut recorder = Recorder::new(&blocker, 60, identity());
        recorder.record(DumpEvent::Open, at(100), true);
        assert!(!recorder.is_open());
        recorder.record(DumpEvent::Keepalive, at(101), true);
        assert!(!recorder.is_open());
    }

    #[test]
    fn test_failed_write_keeps_recorded_events() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(root.path(), 60, identity());
        recorder.record(DumpEvent::Open, at(100), true);
        let dir = root.path().join("192.0.2.2");
        // Swap in a handle that refuses every write
        let read_only = fs::File::open(dir.join(TEMP_FILE_NAME)).unwrap();
        recorder.current.as_mut().unwrap().file = BufWriter::with_capacity(0, read_only);

        recorder.record(DumpEvent::Keepalive, at(101), true);
        assert!(!recorder.is_open());
        assert!(!dir.join(TEMP_FILE_NAME).exists());
        // Not retried within the failed bucket
        recorder.record(DumpEvent::Keepalive, at(102), true);
        assert!(!recorder.is_open());

        recorder.record(DumpEvent::Keepalive, at(125), true);
        assert!(recorder.is_open());
        recorder.close(at(126));

        let mut saved = DumpReader::open(dir.join("19700101000100")).unwrap();
        assert_eq!(saved.next().unwrap().unwrap().event, DumpEvent::Header(identity()));
        assert_eq!(saved.next().unwrap().unwrap().event, DumpEvent::Open);
        assert_eq!(
            events(&dir.join("19700101000200")),
            vec![
                DumpEvent::Header(identity()),
                DumpEvent::Keepalive,
                DumpEvent::Footer
            ]
        );
    }

    #[test]
    fn test_oversized_record_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(root.path(), 60, identity());
        recorder.record(DumpEvent::Open, at(100), true);
        let oversized = DumpEvent::Announce(Announce {
            prefix: "10.0.0.0/8".parse().unwrap(),
            origin: Origin::IGP,
            next_hop: "192.0.2.2".parse().unwrap(),
            as_path: vec![],
            communities: vec![Community::new(65001, 1); 20_000],
            ext_communities: vec![],
            large_communities: vec![],
        });
        recorder.record(oversized, at(101), true);
        assert!(recorder.is_open());
        recorder.record(DumpEvent::Keepalive, at(102), true);
        recorder.close(at(103));
        assert_eq!(
            events(&root.path().join("192.0.2.2/19700101000100")),
            vec![
                DumpEvent::Header(identity()),
                DumpEvent::Open,
                DumpEvent::Keepalive,
                DumpEvent::Footer
            ]
        );
    }

    #[test]
    fn test_drop_closes_file() {
        let root = tempfile::tempdir().unwrap();
        {
            let mut recorder = Recorder::new(root.path(), 60, identity());
            recorder.record(DumpEvent::Open, at(100), true);
        }
        let dir = root.path().join("192.0.2.2");
        assert!(!dir.join(TEMP_FILE_NAME).exists());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
    }
}
