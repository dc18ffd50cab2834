use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use super::{read_record, DumpError, DumpEvent, DumpRecord};

/// Iterates the records of one recording, from its Header through its Footer.
/// Any structural problem ends iteration with a single error.
pub struct DumpReader<R> {
    inner: R,
    started: bool,
    finished: bool,
}

impl DumpReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DumpError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> DumpReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            started: false,
            finished: false,
        }
    }

    fn next_record(&mut self) -> Result<DumpRecord, DumpError> {
        let record = match read_record(&mut self.inner)? {
            Some(record) => record,
            None if !self.started => return Err(DumpError::MissingHeader),
            None => return Err(DumpError::MissingFooter),
        };
        match (&record.event, self.started) {
            (DumpEvent::Header(_), false) => self.started = true,
            (_, false) => return Err(DumpError::MissingHeader),
            (DumpEvent::Header(_), true) => {
                return Err(DumpError::Malformed("second peer header in recording"))
            }
            (DumpEvent::Footer, true) => self.finished = true,
            _ => (),
        }
        Ok(record)
    }
}

impl<R: Read> Iterator for DumpReader<R> {
    type Item = Result<DumpRecord, DumpError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let record = self.next_record();
        if record.is_err() {
            self.finished = true;
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::{write_record, PeerHeader};
    use crate::models::Relationship;
    use crate::utils::Timestamp;

    fn write(events: Vec<DumpEvent>) -> Vec<u8> {
        let mut buf = Vec::new();
        for (i, event) in events.into_iter().enumerate() {
            let record = DumpRecord::new(Timestamp::new(100 + i as u64, 0), event);
            write_record(&mut buf, &record).unwrap();
        }
        buf
    }

    fn header() -> DumpEvent {
        DumpEvent::Header(PeerHeader {
            address: "2001:db8::2".parse().unwrap(),
            asn: 65001,
            relationship: Relationship::Internal,
        })
    }

    #[test]
    fn test_read_full_recording() {
        let buf = write(vec![
            header(),
            DumpEvent::Open,
            DumpEvent::Withdrawn("2001:db8::/32".parse().unwrap()),
            DumpEvent::Footer,
        ]);
        let events: Vec<_> = DumpReader::new(&buf[..])
            .map(|r| r.unwrap().event)
            .collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], header());
        assert_eq!(events[3], DumpEvent::Footer);
    }

    #[test]
    fn test_stops_at_footer() {
        let mut buf = write(vec![header(), DumpEvent::Footer]);
        buf.extend_from_slice(&[0xde, 0xad]);
        assert_eq!(DumpReader::new(&buf[..]).count(), 2);
    }

    #[test]
    fn test_missing_header() {
        let buf = write(vec![DumpEvent::Keepalive, DumpEvent::Footer]);
        let results: Vec<_> = DumpReader::new(&buf[..]).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(DumpError::MissingHeader)));

        assert!(matches!(
            DumpReader::new(&[][..]).next(),
            Some(Err(DumpError::MissingHeader))
        ));
    }

    #[test]
    fn test_missing_footer() {
        let buf = write(vec![header(), DumpEvent::Keepalive]);
        let results: Vec<_> = DumpReader::new(&buf[..]).collect();
        assert_eq!(results.len(), 3);
        assert!(matches!(results[2], Err(DumpError::MissingFooter)));
    }

    #[test]
    fn test_truncated_recording() {
        let buf = write(vec![header(), DumpEvent::Keepalive, DumpEvent::Footer]);
        let results: Vec<_> = DumpReader::new(&buf[..buf.len() - 5]).collect();
        assert!(matches!(results.last(), Some(Err(DumpError::ShortRecord))));
    }
}
