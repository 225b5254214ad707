use anyhow::{Result, anyhow};
use log::{debug, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::{
    ffi::OsString,
    path::Path,
    sync::mpsc::{self, Receiver},
};

/// Flags edits to one profile file. Watches the parent directory since
/// editors usually replace the file rather than write it in place.
pub struct ProfileWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<()>,
}

impl ProfileWatcher {
    pub fn new(path: &Path) -> Result<Self> {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow!("profile path has no parent: {}", path.display()))?;
        let name: OsString = path
            .file_name()
            .ok_or_else(|| anyhow!("profile path has no file name: {}", path.display()))?
            .to_os_string();

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(ev) => {
                let relevant = matches!(
                    ev.kind,
                    EventKind::Create(_) | EventKind::Modify(_)
                ) && ev.paths.iter().any(|p| p.file_name() == Some(name.as_os_str()));
                if relevant {
                    let _ = tx.send(());
                }
            }
            Err(e) => warn!("profile watch error: {e}"),
        })
        .map_err(|e| anyhow!("failed to start watcher: {e}"))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| anyhow!("failed to watch {}: {e}", dir.display()))?;
        debug!("watching {}", path.display());

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// True when at least one edit arrived since the last call.
    pub fn changed(&self) -> bool {
        let mut any = false;
        while self.rx.try_recv().is_ok() {
            any = true;
        }
        any
    }
}
