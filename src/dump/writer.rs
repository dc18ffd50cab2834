use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{write_record, DumpError, DumpEvent, DumpRecord};
use crate::utils::bucket_file_name;

/// Name of the file being written in a peer directory, renamed when the bucket closes
pub const TEMP_FILE_NAME: &str = "temp.dump";

/// One open recording file
#[derive(Debug)]
pub struct DumpWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    pub(super) file: BufWriter<File>,
    /// No records besides header/footer written yet
    empty: bool,
}

impl DumpWriter {
    /// Create (or truncate) the temporary file in `dir` for the bucket starting at `bucket`
    pub fn create(dir: &Path, bucket: u64) -> Result<Self, DumpError> {
        fs::create_dir_all(dir)?;
        let temp_path = dir.join(TEMP_FILE_NAME);
        let file = File::create(&temp_path)?;
        Ok(Self {
            temp_path,
            final_path: dir.join(bucket_file_name(bucket)),
            file: BufWriter::new(file),
            empty: true,
        })
    }

    pub fn write(&mut self, record: &DumpRecord) -> Result<(), DumpError> {
        write_record(&mut self.file, record)?;
        if !matches!(record.event, DumpEvent::Header(_) | DumpEvent::Footer) {
            self.empty = false;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Flush and move the file to its final name.
    /// Files holding nothing but header and footer are removed, returning `None`.
    pub fn finish(self) -> Result<Option<PathBuf>, DumpError> {
        let DumpWriter {
            temp_path,
            final_path,
            mut file,
            empty,
        } = self;
        file.flush()?;
        drop(file);
        fs::rename(&temp_path, &final_path)?;
        if empty {
            fs::remove_file(&final_path)?;
            return Ok(None);
        }
        Ok(Some(final_path))
    }
}
