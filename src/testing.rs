use std::any::type_name;
use std::fmt::Debug;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use codeq::Decode;
use codeq::Encode;

use crate::api::page_store::PageStore;
use crate::CheckpointEntry;
use crate::WalPointer;

#[allow(dead_code)]
pub fn test_codec_without_corruption<D: Encode + Decode + PartialEq + Debug>(
    encoded_bytes: &[u8],
    v: &D,
) -> Result<(), io::Error> {
    // convert `correct` to string if possible
    let correct_str = String::from_utf8_lossy(encoded_bytes);
    println!("correct data: {}", correct_str);

    let mes =
        format!("Type: {} encoded data: {:?}", type_name::<D>(), correct_str);

    // Test encoding
    {
        let mut b = Vec::new();
        let n = v.encode(&mut b)?;
        assert_eq!(n, b.len(), "output len, {}", &mes);
        assert_eq!(b, encoded_bytes, "output data, {}", &mes);
    }

    // Assert the input is correct

    {
        let b = encoded_bytes.to_vec();
        let decoded = D::decode(&mut b.as_slice())?;
        assert_eq!(v, &decoded, "decode, {}", &mes);
    }

    Ok(())
}

/// Poll `cond` until it holds or `timeout` passes. Returns the last result.
#[allow(dead_code)]
pub(crate) fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// A [`PageStore`] that records what the engine asks of it.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub(crate) struct RecordingPageStore {
    /// Marks passed to `flush_dirty_pages_since`.
    pub(crate) marks: Mutex<Vec<WalPointer>>,

    /// Completed checkpoint ids, in order.
    pub(crate) completed: Mutex<Vec<u64>>,

    /// Fail the next flush.
    pub(crate) fail_next: AtomicBool,

    /// Floor to return instead of the mark.
    pub(crate) floor: Mutex<Option<WalPointer>>,

    /// Sleep in every flush.
    pub(crate) delay: Mutex<Option<Duration>>,
}

#[allow(dead_code)]
impl RecordingPageStore {
    pub(crate) fn marks(&self) -> Vec<WalPointer> {
        self.marks.lock().unwrap().clone()
    }

    pub(crate) fn completed(&self) -> Vec<u64> {
        self.completed.lock().unwrap().clone()
    }

    pub(crate) fn set_floor(&self, floor: Option<WalPointer>) {
        *self.floor.lock().unwrap() = floor;
    }

    pub(crate) fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }
}

impl PageStore for RecordingPageStore {
    fn flush_dirty_pages_since(&self, mark: WalPointer) -> Result<WalPointer, io::Error> {
        self.marks.lock().unwrap().push(mark);

        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            std::thread::sleep(d);
        }

        if self.fail_next.swap(false, Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected flush failure"));
        }

        let floor = *self.floor.lock().unwrap();
        Ok(floor.unwrap_or(mark))
    }

    fn on_checkpoint_complete(&self, entry: &CheckpointEntry) {
        self.completed.lock().unwrap().push(entry.id);
    }
}
