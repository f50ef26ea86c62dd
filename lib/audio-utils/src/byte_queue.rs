use std::{collections::VecDeque, sync::Mutex};

/// Thread-safe FIFO of raw PCM bytes filled by a capture thread and drained
/// by the mixer.
///
/// Bytes the consumer could not use are handed back with
/// [`AudioByteQueue::return_to_front`] so they lead the next drain.
#[derive(Debug)]
pub struct AudioByteQueue {
    block_align: usize,
    max_len: Option<usize>,
    inner: Mutex<VecDeque<u8>>,
}

impl AudioByteQueue {
    pub fn new(block_align: usize) -> Self {
        Self {
            block_align: block_align.max(1),
            max_len: None,
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Bound the queue, dropping the oldest whole frames once it overflows.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len - max_len % self.block_align);
        self
    }

    pub fn block_align(&self) -> usize {
        self.block_align
    }

    pub fn push(&self, bytes: &[u8]) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.extend(bytes);

        if let Some(max_len) = self.max_len
            && inner.len() > max_len
        {
            let excess = inner.len() - max_len;
            let excess = excess.div_ceil(self.block_align) * self.block_align;
            log::warn!("audio queue overflow, dropping {excess} bytes");
            let len = inner.len();
            inner.drain(..excess.min(len));
        }
    }

    pub fn push_silence(&self, len: usize) {
        self.push(&vec![0; len]);
    }

    pub fn drain_all(&self) -> Vec<u8> {
        match self.inner.lock() {
            Ok(mut inner) => inner.drain(..).collect(),
            Err(_) => vec![],
        }
    }

    /// Put unconsumed bytes back ahead of anything pushed since the drain.
    pub fn return_to_front(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Ok(mut inner) = self.inner.lock() {
            for &b in bytes.iter().rev() {
                inner.push_front(b);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.clear();
        }
    }
}

/// Trim the longer of two correlated streams to the shorter one and return
/// what was cut from each, `(first_surplus, second_surplus)`. An empty side
/// leaves the other one untouched so a silent device never holds it back.
pub fn split_surplus(first: &mut Vec<u8>, second: &mut Vec<u8>) -> (Vec<u8>, Vec<u8>) {
    if first.is_empty() || second.is_empty() {
        return (vec![], vec![]);
    }

    if first.len() > second.len() {
        (first.split_off(second.len()), vec![])
    } else {
        (vec![], second.split_off(first.len()))
    }
}

/// Drain both queues, handing the surplus of the longer one back to it.
pub fn drain_aligned(first: &AudioByteQueue, second: &AudioByteQueue) -> (Vec<u8>, Vec<u8>) {
    let mut a = first.drain_all();
    let mut b = second.drain_all();

    let (surplus_a, surplus_b) = split_surplus(&mut a, &mut b);
    first.return_to_front(&surplus_a);
    second.return_to_front(&surplus_b);

    (a, b)
}
