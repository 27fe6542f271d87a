// ABOUTME: Virtual-file streamer adaptor exposing remote DVR files as seekable byte streams (C5)
// ABOUTME: Lazily opens a server-side handle, gated on the recording being Finished or Recording

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::collab::{Catalogue, CatalogueError};
use crate::manager::recording::RecordingStatus;
use crate::rpc::HtspClient;
use crate::{Error, Result};

const FILE_URL_SCHEME: &str = "tvheadend-file";
const VFS_URL_SCHEME: &str = "x-tvheadend";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VfsKind {
    Directory,
    File(i64),
}

/// Parses either accepted URL form: `tvheadend-file:///{dvr_id}` or
/// `x-tvheadend:///{dvr_id?}` (an empty id selects the root directory).
fn parse_url(url: &str) -> Result<VfsKind> {
    let rest = url
        .strip_prefix(&format!("{FILE_URL_SCHEME}:///"))
        .or_else(|| url.strip_prefix(&format!("{VFS_URL_SCHEME}:///")))
        .ok_or_else(|| Error::Value(format!("'{url}' is not a recognized VFS URL")))?;

    if rest.is_empty() {
        return Ok(VfsKind::Directory);
    }
    rest.parse::<i64>()
        .map(VfsKind::File)
        .map_err(|_| Error::Value(format!("'{url}' has a non-numeric dvr id")))
}

struct OpenFile {
    dvr_id: i64,
    handle_id: Option<i64>,
    position: i64,
}

/// Byte-stream facade over one DVR recording (file form) or the server
/// root (directory form). Each instance owns its own handle state; reads
/// and seeks on the same instance serialize through `state`.
pub struct DvrFileStream {
    client: HtspClient,
    catalogue: Arc<dyn Catalogue>,
    process_start_time: i64,
    io_chunk_size: i64,
    kind: Option<VfsKind>,
    file: Mutex<Option<OpenFile>>,
}

impl DvrFileStream {
    /// `io_chunk_size` bounds the default read size a caller gets back when
    /// it asks for `read(None)`, mirroring the ambient chunk-size setting.
    pub fn new(
        client: HtspClient,
        catalogue: Arc<dyn Catalogue>,
        process_start_time: i64,
        io_chunk_size: usize,
    ) -> DvrFileStream {
        DvrFileStream {
            client,
            catalogue,
            process_start_time,
            io_chunk_size: io_chunk_size as i64,
            kind: None,
            file: Mutex::new(None),
        }
    }

    /// Records the dvr id and resets position; does not touch the server.
    pub fn open(&mut self, url: &str) -> Result<()> {
        let kind = parse_url(url)?;
        self.kind = Some(kind);
        self.file = Mutex::new(match kind {
            VfsKind::File(dvr_id) => Some(OpenFile {
                dvr_id,
                handle_id: None,
                position: 0,
            }),
            VfsKind::Directory => None,
        });
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        let handle_id = {
            let mut file = self.file.lock().await;
            file.as_mut().and_then(|f| f.handle_id.take())
        };
        if let Some(handle_id) = handle_id {
            if self.client.is_active() {
                self.client.file_close(handle_id).await?;
            }
        }
        self.kind = None;
        *self.file.lock().await = None;
        Ok(())
    }

    /// Checks whether the catalogued recording status allows opening a
    /// server-side handle at all (`Finished` or `Recording`).
    async fn is_eligible(&self) -> bool {
        let Some(VfsKind::File(dvr_id)) = self.kind else {
            return false;
        };
        let resource = crate::manager::resource_url(dvr_id);
        match self.catalogue.load_by_resource(&resource) {
            Ok(entry) => matches!(
                entry.recording_status,
                RecordingStatus::Finished | RecordingStatus::Recording
            ),
            Err(_) => false,
        }
    }

    /// Opens the server-side handle on first use, but only when eligible.
    /// Leaves the handle closed (and every dependent operation at its
    /// fallback sentinel) otherwise.
    async fn ensure_handle_opened(&self) -> Result<()> {
        let Some(VfsKind::File(dvr_id)) = self.kind else {
            return Ok(());
        };

        let already_open = self.file.lock().await.as_ref().and_then(|f| f.handle_id).is_some();
        if already_open || !self.is_eligible().await {
            return Ok(());
        }

        let handle_id = self.client.file_open(&format!("/dvrfile/{dvr_id}")).await?;
        if let Some(file) = self.file.lock().await.as_mut() {
            file.handle_id = Some(handle_id);
        }
        Ok(())
    }

    pub async fn size(&self) -> Result<i64> {
        match self.kind {
            Some(VfsKind::Directory) => Ok(0),
            Some(VfsKind::File(_)) => {
                self.ensure_handle_opened().await?;
                let handle_id = self.file.lock().await.as_ref().and_then(|f| f.handle_id);
                match handle_id {
                    Some(id) => Ok(self.client.file_stat(id).await?.0),
                    None => Ok(0),
                }
            }
            None => Err(Error::Value("stream not opened".into())),
        }
    }

    pub async fn time_updated(&self) -> Result<i64> {
        match self.kind {
            Some(VfsKind::Directory) => Ok(self.process_start_time),
            Some(VfsKind::File(_)) => {
                self.ensure_handle_opened().await?;
                let handle_id = self.file.lock().await.as_ref().and_then(|f| f.handle_id);
                match handle_id {
                    Some(id) => Ok(self.client.file_stat(id).await?.1),
                    None => Ok(self.process_start_time),
                }
            }
            None => Err(Error::Value("stream not opened".into())),
        }
    }

    pub async fn read(&self, n: Option<i64>) -> Result<Option<Vec<u8>>> {
        if !matches!(self.kind, Some(VfsKind::File(_))) {
            return Err(Error::Value("stream not opened for reading".into()));
        }
        self.ensure_handle_opened().await?;

        let handle_id = self.file.lock().await.as_ref().and_then(|f| f.handle_id);
        let Some(handle_id) = handle_id else {
            return Ok(None);
        };
        if !self.client.is_active() {
            return Ok(None);
        }

        let size = n.filter(|&n| n > 0).unwrap_or(self.io_chunk_size);
        let data = self.client.file_read(handle_id, size).await?;
        if let Some(file) = self.file.lock().await.as_mut() {
            file.position += data.len() as i64;
        }
        Ok(Some(data))
    }

    pub async fn seek(&self, offset: i64) -> Result<i64> {
        if !matches!(self.kind, Some(VfsKind::File(_))) {
            return Err(Error::Value("stream not opened for seeking".into()));
        }
        self.ensure_handle_opened().await?;

        let handle_id = self.file.lock().await.as_ref().and_then(|f| f.handle_id);
        let Some(handle_id) = handle_id else {
            return Ok(self.tell_sync());
        };

        let new_offset = self.client.file_seek(handle_id, offset).await?;
        if let Some(file) = self.file.lock().await.as_mut() {
            file.position = new_offset;
        }
        Ok(new_offset)
    }

    pub async fn tell(&self) -> i64 {
        self.file.lock().await.as_ref().map(|f| f.position).unwrap_or(0)
    }

    fn tell_sync(&self) -> i64 {
        self.file.try_lock().ok().and_then(|f| f.as_ref().map(|f| f.position)).unwrap_or(0)
    }

    pub async fn is_eof(&self) -> Result<bool> {
        self.ensure_handle_opened().await?;
        let (handle_open, position) = {
            let file = self.file.lock().await;
            (
                file.as_ref().and_then(|f| f.handle_id).is_some(),
                file.as_ref().map(|f| f.position).unwrap_or(0),
            )
        };
        if !handle_open {
            return Ok(true);
        }
        Ok(position >= self.size().await?)
    }

    pub async fn is_valid(&self) -> Result<bool> {
        if self.kind.is_none() || !self.client.is_active() {
            return Ok(false);
        }
        match self.kind {
            Some(VfsKind::Directory) => Ok(true),
            Some(VfsKind::File(_)) => {
                self.ensure_handle_opened().await?;
                Ok(self.file.lock().await.as_ref().and_then(|f| f.handle_id).is_some())
            }
            None => Ok(false),
        }
    }
}
