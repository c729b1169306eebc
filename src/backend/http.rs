use super::{Acquire, AcquireItem, ChangelogTransport, FetchProgress, ItemStatus};
use crate::error::TransportError;

use anyhow::{bail, Context, Result};
use reqwest::{blocking::Client, StatusCode};
use std::{
    fs::{self, File},
    io::{BufRead, BufReader, Read, Write},
    time::Duration,
};

/// Plain HTTP changelog transport
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        HttpTransport {
            client: Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangelogTransport for HttpTransport {
    fn open(&self, uri: &str, timeout: Duration) -> Result<Box<dyn BufRead>, TransportError> {
        // The timeout covers this request only, including reading the body
        let resp = self.client.get(uri).timeout(timeout).send()?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(TransportError::NotFound),
            s if !s.is_success() => Err(TransportError::Http(s.as_u16())),
            _ => Ok(Box::new(BufReader::new(resp))),
        }
    }
}

/// Sequential downloader. Every item is streamed into its destination while
/// its size and checksum are verified; a failed item leaves no file behind.
pub struct HttpAcquire {
    client: Client,
}

impl HttpAcquire {
    pub fn new() -> Self {
        HttpAcquire {
            client: Client::new(),
        }
    }
}

impl Default for HttpAcquire {
    fn default() -> Self {
        Self::new()
    }
}

impl Acquire for HttpAcquire {
    fn run(&mut self, items: &[AcquireItem], progress: &mut dyn FetchProgress) -> Vec<ItemStatus> {
        progress.start();
        let res = items
            .iter()
            .map(|item| match download_file(&self.client, item) {
                Ok(()) => {
                    debug!("Fetched {}", item.uri);
                    progress.item_done(&item.uri);
                    ItemStatus::Done
                }
                Err(e) => {
                    let reason = format!("{:#}", e);
                    error!("Failed to fetch {}: {}", item.uri, reason);
                    progress.item_failed(&item.uri, &reason);
                    if item.destination.is_file() {
                        let _ = fs::remove_file(&item.destination);
                    }
                    ItemStatus::Error(reason)
                }
            })
            .collect();
        progress.stop();
        res
    }
}

fn download_file(client: &Client, item: &AcquireItem) -> Result<()> {
    let mut resp = client.get(&item.uri).send()?;
    resp.error_for_status_ref()?;

    if let Some(parent) = item.destination.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            fs::create_dir_all(parent).context("Failed to create download directory")?;
        }
    }
    let mut f = File::create(&item.destination).context(format!(
        "Failed to create {}",
        item.destination.display()
    ))?;

    let mut validator = item.checksum.as_ref().map(|c| c.get_validator());
    let mut len: u64 = 0;
    let mut buf = [0u8; 8192];
    loop {
        let n = resp.read(&mut buf)?;
        if n == 0 {
            break;
        }
        f.write_all(&buf[..n])?;
        len += n as u64;
        if let Some(ref mut validator) = validator {
            validator.update(&buf[..n]);
        }
    }
    f.flush()?;

    if item.size != 0 && len != item.size {
        bail!(
            "Bad file size when downloading {}: expected {}, got {}. Mirror may be syncing.",
            item.description,
            item.size,
            len
        );
    }
    if let Some(validator) = validator {
        // finish() returns false if validate failed
        if !validator.finish() {
            bail!("Checksum mismatch for {}", item.description);
        }
    }

    Ok(())
}
