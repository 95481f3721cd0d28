use crate::protocol::{LineParser, MDPS_TO_DPS, MG_TO_MS2};
use crate::types::Sample;
use anyhow::{Context, Result};
use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Anything that produces IMU samples for the tracker.
pub trait SampleSource: Send {
    /// The next sample, or `None` if nothing new is ready. Must not block.
    ///
    /// `None` means "no data this tick", never a zero-valued reading.
    fn next_sample(&mut self) -> Option<Sample>;

    /// Fraction of recent polls that produced no sample.
    fn miss_rate(&self) -> f64 {
        0.0
    }
}

/// Sliding window of poll outcomes.
#[derive(Debug, Clone)]
pub struct MissCounter {
    window: VecDeque<bool>,
    capacity: usize,
}

impl MissCounter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Window covering one second of polls at the given dashboard interval.
    pub fn for_interval_ms(interval_ms: u64) -> Self {
        Self::new((1000 / interval_ms.max(1)) as usize)
    }

    pub fn record_hit(&mut self) {
        self.push(false);
    }

    pub fn record_miss(&mut self) {
        self.push(true);
    }

    pub fn rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let misses = self.window.iter().filter(|&&missed| missed).count();
        misses as f64 / self.window.len() as f64
    }

    fn push(&mut self, missed: bool) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(missed);
    }
}

/// Noise figures for the synthetic generator, in the device's raw units.
const SIM_ACCEL_NOISE_MG: f64 = 10.0;
const SIM_GYRO_NOISE_MDPS: f64 = 50.0;
const SIM_MAG_NOISE_GAUSS: f64 = 0.01;
const SIM_MAG_FIELD_GAUSS: DVec3 = DVec3::new(0.5, 0.0, -0.5);

/// Generates a device lying flat and still, with gaussian sensor noise.
///
/// Never runs dry. Pass a seed for reproducible streams.
pub struct SyntheticSource {
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    fn gaussian_noise(&mut self, stddev: f64) -> f64 {
        if stddev == 0.0 {
            return 0.0;
        }
        let u1: f64 = self.rng.gen::<f64>().max(f64::EPSILON);
        let u2: f64 = self.rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        z * stddev
    }

    fn noise3(&mut self, stddev: f64) -> DVec3 {
        DVec3::new(
            self.gaussian_noise(stddev),
            self.gaussian_noise(stddev),
            self.gaussian_noise(stddev),
        )
    }
}

impl SampleSource for SyntheticSource {
    fn next_sample(&mut self) -> Option<Sample> {
        let accel_mg = DVec3::new(0.0, 0.0, 1000.0) + self.noise3(SIM_ACCEL_NOISE_MG);
        let gyro_mdps = self.noise3(SIM_GYRO_NOISE_MDPS);
        let mag = SIM_MAG_FIELD_GAUSS + self.noise3(SIM_MAG_NOISE_GAUSS);

        Some(Sample {
            accel: accel_mg * MG_TO_MS2,
            gyro: gyro_mdps * MDPS_TO_DPS,
            mag: Some(mag),
        })
    }
}

/// Serial line speed for tty links.
pub const BAUD_RATE: u32 = 115_200;

/// Bytes read from the link per call.
const READ_CHUNK: usize = 1024;
/// Upper bound on reads per poll, so a link that never runs dry cannot stall the tracker.
const MAX_READS_PER_POLL: usize = 64;

/// Reads the CSV device link from a non-blocking byte stream.
///
/// Each poll drains whatever the link has buffered and returns the newest
/// complete sample; older lines from the same burst are counted as stale and
/// dropped, so a device that sends faster than the tracker polls never builds
/// up a backlog. The reader is owned directly and closed on drop.
pub struct LinkSource {
    reader: Option<Box<dyn Read + Send>>,
    parser: LineParser,
    misses: MissCounter,
    stale_lines: u64,
}

impl LinkSource {
    /// Open a serial device (e.g. `/dev/ttyACM0`) or any readable file.
    ///
    /// The device is opened non-blocking. A tty is switched to raw mode at
    /// [`BAUD_RATE`], which UART adapters need and CDC-ACM devices ignore.
    pub fn open(path: &Path, misses: MissCounter) -> Result<Self> {
        let file = open_link(path)
            .with_context(|| format!("Failed to open device link {}", path.display()))?;
        tracing::info!(path = %path.display(), baud = BAUD_RATE, "Connected to device link");
        Ok(Self::from_reader(file, misses))
    }

    /// Wrap an already-open stream.
    ///
    /// `reader` must not block: it should return [`ErrorKind::WouldBlock`]
    /// when no bytes are ready.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, misses: MissCounter) -> Self {
        Self {
            reader: Some(Box::new(reader)),
            parser: LineParser::new(),
            misses,
            stale_lines: 0,
        }
    }

    /// Valid lines dropped because a newer one arrived in the same poll.
    pub fn stale_lines(&self) -> u64 {
        self.stale_lines
    }

    fn read_available(&mut self) {
        let Some(reader) = self.reader.as_mut() else {
            return;
        };

        let mut buf = [0u8; READ_CHUNK];
        let mut closed = false;
        for _ in 0..MAX_READS_PER_POLL {
            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::warn!("Device link closed");
                    closed = true;
                    break;
                }
                Ok(n) => self.parser.push_data(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => {
                    tracing::error!(?e, "Device link read error");
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            self.reader = None;
        }
    }

    /// Parse every complete line in the buffer and keep the newest sample.
    fn newest_sample(&mut self) -> Option<Sample> {
        let mut newest = None;
        while let Some(parsed) = self.parser.next_sample() {
            match parsed {
                Ok(sample) => {
                    if newest.replace(sample).is_some() {
                        self.stale_lines += 1;
                    }
                }
                Err(e) => tracing::trace!(%e, "Skipping malformed line"),
            }
        }
        newest
    }
}

impl SampleSource for LinkSource {
    fn next_sample(&mut self) -> Option<Sample> {
        self.read_available();

        let sample = self.newest_sample();
        if sample.is_some() {
            self.misses.record_hit();
        } else {
            self.misses.record_miss();
        }
        sample
    }

    fn miss_rate(&self) -> f64 {
        self.misses.rate()
    }
}

#[cfg(unix)]
fn open_link(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
        .open(path)?;
    configure_tty(&file)?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_link(_path: &Path) -> std::io::Result<File> {
    Err(std::io::Error::new(
        ErrorKind::Unsupported,
        "device links need a unix tty",
    ))
}

/// Raw mode at [`BAUD_RATE`]. Anything that is not a tty is left alone.
#[cfg(unix)]
fn configure_tty(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // SAFETY: `fd` stays open for the lifetime of `file`, and `termios` is a
    // plain C struct that `tcgetattr` fully initializes before it is read.
    unsafe {
        if libc::isatty(fd) != 1 {
            return Ok(());
        }

        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        if libc::cfsetispeed(&mut tio, libc::B115200) != 0
            || libc::cfsetospeed(&mut tio, libc::B115200) != 0
            || libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0
        {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Non-blocking test link: hands out whatever was queued, then `WouldBlock`.
    #[derive(Clone, Default)]
    struct QueuedLink {
        pending: Arc<Mutex<Vec<u8>>>,
        released: Arc<AtomicBool>,
    }

    impl QueuedLink {
        fn send(&self, bytes: &[u8]) {
            self.pending.lock().unwrap().extend_from_slice(bytes);
        }
    }

    impl Read for QueuedLink {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_empty() {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(pending.len());
            buf[..n].copy_from_slice(&pending[..n]);
            pending.drain(..n);
            Ok(n)
        }
    }

    impl Drop for QueuedLink {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn miss_counter_window() {
        let mut counter = MissCounter::new(4);
        assert_eq!(counter.rate(), 0.0);

        counter.record_miss();
        counter.record_hit();
        assert_eq!(counter.rate(), 0.5);

        for _ in 0..4 {
            counter.record_hit();
        }
        assert_eq!(counter.rate(), 0.0);

        for _ in 0..4 {
            counter.record_miss();
        }
        assert_eq!(counter.rate(), 1.0);
    }

    #[test]
    fn miss_counter_covers_one_second() {
        let counter = MissCounter::for_interval_ms(50);
        assert_eq!(counter.capacity, 20);
        assert_eq!(MissCounter::for_interval_ms(0).capacity, 1000);
    }

    #[test]
    fn synthetic_source_looks_like_a_resting_device() {
        let mut source = SyntheticSource::new(Some(7));
        let n = 2000;
        let mut accel_sum = DVec3::ZERO;
        for _ in 0..n {
            let s = source.next_sample().unwrap();
            assert!(s.accel.is_finite() && s.gyro.is_finite());
            assert!(s.mag.is_some());
            accel_sum += s.accel;
        }
        let mean = accel_sum / n as f64;
        assert!((mean.z - 9.80665).abs() < 0.05);
        assert!(mean.x.abs() < 0.05 && mean.y.abs() < 0.05);
    }

    #[test]
    fn synthetic_seed_is_reproducible() {
        let mut a = SyntheticSource::new(Some(42));
        let mut b = SyntheticSource::new(Some(42));
        for _ in 0..10 {
            assert_eq!(a.next_sample(), b.next_sample());
        }
    }

    #[test]
    fn link_source_returns_newest_line() {
        let data = b"0,0,1000,0,0,0\n500,0,1000,0,0,100\n".to_vec();
        let mut source = LinkSource::from_reader(Cursor::new(data), MissCounter::new(10));

        let sample = source.next_sample().unwrap();
        assert!((sample.accel.x - 0.5 * 9.80665).abs() < 1e-9);
        assert!((sample.gyro.z - 0.1).abs() < 1e-12);
        assert_eq!(source.stale_lines(), 1);

        // End of stream: every further poll is a miss, never a zero sample.
        for _ in 0..10 {
            assert!(source.next_sample().is_none());
        }
        assert!(source.miss_rate() > 0.5);
    }

    #[test]
    fn link_source_skips_bad_lines() {
        let data = b"bogus\n0,0,1000,0,0,0\n1,2,3\n".to_vec();
        let mut source = LinkSource::from_reader(Cursor::new(data), MissCounter::new(100));

        let sample = source.next_sample().unwrap();
        assert!((sample.accel.z - 9.80665).abs() < 1e-9);
        assert_eq!(source.stale_lines(), 0);
    }

    #[test]
    fn fast_device_does_not_build_a_backlog() {
        let link = QueuedLink::default();
        let mut source = LinkSource::from_reader(link.clone(), MissCounter::new(20));

        // Five lines arrive between polls.
        let mut seq = 0u32;
        for _ in 0..2000 {
            let mut burst = String::new();
            for _ in 0..5 {
                seq += 1;
                burst.push_str(&format!("{seq},0,1000,0,0,0\n"));
            }
            link.send(burst.as_bytes());

            let sample = source.next_sample().unwrap();
            assert!((sample.accel.x - seq as f64 * MG_TO_MS2).abs() < 1e-9);
            assert_eq!(source.parser.buffered(), 0);
        }
        assert_eq!(source.stale_lines(), 2000 * 4);
        assert_eq!(source.miss_rate(), 0.0);
    }

    #[test]
    fn quiet_link_polls_without_blocking_and_releases_on_drop() {
        let link = QueuedLink::default();
        let released = link.released.clone();
        let mut source = LinkSource::from_reader(link, MissCounter::new(4));

        for _ in 0..4 {
            assert!(source.next_sample().is_none());
        }
        assert_eq!(source.miss_rate(), 1.0);
        assert!(!released.load(Ordering::SeqCst));

        drop(source);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn link_partial_line_completes_on_next_poll() {
        let link = QueuedLink::default();
        let mut source = LinkSource::from_reader(link.clone(), MissCounter::new(4));

        link.send(b"0,0,10");
        assert!(source.next_sample().is_none());
        link.send(b"00,0,0,0\n");
        let sample = source.next_sample().unwrap();
        assert!((sample.accel.z - 9.80665).abs() < 1e-9);
    }

    #[cfg(unix)]
    #[test]
    fn open_reads_a_plain_file() {
        let path = std::env::temp_dir().join(format!("posetrack-link-{}.csv", std::process::id()));
        std::fs::write(&path, b"0,0,1000,0,0,0\n0,1000,0,0,0,0\n").unwrap();

        let mut source = LinkSource::open(&path, MissCounter::new(4)).unwrap();
        let sample = source.next_sample().unwrap();
        assert!((sample.accel.y - 9.80665).abs() < 1e-9);
        assert!(source.next_sample().is_none());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn open_missing_device_fails() {
        let result = LinkSource::open(
            Path::new("/nonexistent/posetrack-device"),
            MissCounter::new(1),
        );
        assert!(result.is_err());
    }
}
