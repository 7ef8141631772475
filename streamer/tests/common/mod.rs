//! Shared fakes for integration tests.
#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;

use streamer::encoder::{EncoderLauncher, EncoderProcess, LaunchRequest};
use streamer::storage::SpaceProbe;
use streamer::{Error, Result};

/// Process stand-in whose liveness is controlled by the test.
pub struct FakeProcess {
    pid: u32,
    alive: Arc<AtomicBool>,
    kills: Arc<AtomicUsize>,
    refuse_kill: Arc<AtomicBool>,
}

impl EncoderProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.refuse_kill.load(Ordering::SeqCst) {
            return Err(io::Error::other("kill refused"));
        }
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Launcher that counts launches and optionally writes the files an encoder
/// would produce.
#[derive(Default)]
pub struct FakeLauncher {
    launches: AtomicUsize,
    kills: Arc<AtomicUsize>,
    next_pid: AtomicU32,
    fail: AtomicBool,
    refuse_kill: Arc<AtomicBool>,
    delay: Duration,
    /// `(file name, size)` written into the output directory on launch.
    outputs: Vec<(String, usize)>,
    processes: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_output(mut self, name: &str, size: usize) -> Self {
        self.outputs.push((name.to_string(), size));
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make `kill` fail and leave the process running.
    pub fn set_kill_failing(&self, fail: bool) {
        self.refuse_kill.store(fail, Ordering::SeqCst);
    }

    /// Processes launched and not yet killed or crashed.
    pub fn alive(&self) -> usize {
        self.processes
            .lock()
            .iter()
            .filter(|alive| alive.load(Ordering::SeqCst))
            .count()
    }

    /// Simulate every launched encoder crashing.
    pub fn crash_all(&self) {
        for alive in self.processes.lock().iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl EncoderLauncher for FakeLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn EncoderProcess>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::encoder_launch(&request.channel, "fake launcher failure"));
        }

        self.launches.fetch_add(1, Ordering::SeqCst);
        for (name, size) in &self.outputs {
            tokio::fs::write(request.output_dir.join(name), vec![b'x'; *size])
                .await
                .map_err(Error::from)?;
        }

        let alive = Arc::new(AtomicBool::new(true));
        self.processes.lock().push(Arc::clone(&alive));
        Ok(Box::new(FakeProcess {
            pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            alive,
            kills: Arc::clone(&self.kills),
            refuse_kill: Arc::clone(&self.refuse_kill),
        }))
    }
}

/// A bounded volume: free space is capacity minus the bytes stored under root.
pub struct FakeVolume {
    root: PathBuf,
    capacity: u64,
    available: AtomicBool,
}

impl FakeVolume {
    pub fn new(root: &Path, capacity: u64) -> Self {
        Self {
            root: root.to_path_buf(),
            capacity,
            available: AtomicBool::new(true),
        }
    }

    /// Make the probe report "unknown".
    pub fn set_unknown(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    fn used(dir: &Path) -> u64 {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        entries
            .flatten()
            .map(|entry| match entry.metadata() {
                Ok(m) if m.is_dir() => Self::used(&entry.path()),
                Ok(m) => m.len(),
                Err(_) => 0,
            })
            .sum()
    }
}

impl SpaceProbe for FakeVolume {
    fn available_bytes(&self, _path: &Path) -> Option<u64> {
        if !self.available.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.capacity.saturating_sub(Self::used(&self.root)))
    }
}

/// Write a file of `size` bytes with the given age.
pub fn write_aged(path: &Path, size: usize, age: Duration) {
    std::fs::write(path, vec![b'x'; size]).unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}
