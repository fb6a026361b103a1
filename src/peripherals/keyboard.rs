//! XT keyboard pipeline
//!
//! Models the keyboard side of the 8255 handshake: a bounded scancode
//! FIFO, the BIOS-initiated reset (clock line held low), and the
//! acknowledge pulse that paces delivery.
//!
//! Scancode lifecycle: the host queues make/break codes with
//! [`Keyboard::handle_key_press`]. On each millisecond tick, if the clock
//! line is released, the keyboard is not inhibited and no byte is
//! awaiting acknowledgement, the head of the FIFO is delivered (the
//! platform latches it into the 8255 and raises IRQ 1). The BIOS
//! acknowledges by pulsing the enable/clear line high then low.

/// FIFO capacity; scancodes beyond this are dropped silently.
pub const BUFFER_SIZE: usize = 16;

/// Milliseconds the clock line must be held low to trigger a reset.
pub const RESET_THRESHOLD_MS: u32 = 20;

/// Self-test-passed byte queued after a reset.
pub const SELF_TEST_OK: u8 = 0xAA;

/// Keyboard state.
#[derive(Debug, Clone)]
pub struct Keyboard {
    /// Ring buffer of pending scancodes.
    buffer: [u8; BUFFER_SIZE],
    head: usize,
    len: usize,
    /// Port B bit 7: inhibits delivery while high.
    enable_clear: bool,
    /// Port B bit 6 level: true when the clock line is released.
    clock_line: bool,
    /// Milliseconds accumulated while the clock line is held low.
    clock_low_ms: u32,
    /// A delivered byte has not been acknowledged yet.
    waiting_for_ack: bool,
}

impl Keyboard {
    pub fn new() -> Self {
        Self {
            buffer: [0; BUFFER_SIZE],
            head: 0,
            len: 0,
            enable_clear: false,
            clock_line: true,
            clock_low_ms: 0,
            waiting_for_ack: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Number of scancodes waiting for delivery.
    pub fn buffer_len(&self) -> usize {
        self.len
    }

    /// Peek at a buffered scancode by position.
    pub fn buffer_get(&self, index: usize) -> Option<u8> {
        if index < self.len {
            Some(self.buffer[(self.head + index) % BUFFER_SIZE])
        } else {
            None
        }
    }

    pub fn waiting_for_ack(&self) -> bool {
        self.waiting_for_ack
    }

    fn enqueue(&mut self, scancode: u8) {
        if self.len == BUFFER_SIZE {
            log::debug!("keyboard: buffer full, dropping scancode {scancode:#04x}");
            return;
        }
        self.buffer[(self.head + self.len) % BUFFER_SIZE] = scancode;
        self.len += 1;
    }

    fn dequeue(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let scancode = self.buffer[self.head];
        self.head = (self.head + 1) % BUFFER_SIZE;
        self.len -= 1;
        Some(scancode)
    }

    /// Queue a scancode from the host. Break codes are the make code with
    /// bit 7 set, supplied by the caller.
    pub fn handle_key_press(&mut self, scancode: u8) {
        self.enqueue(scancode);
    }

    /// Track the 8255 port B keyboard control bits.
    ///
    /// `clock_line` is the bit 6 level (true = released). The falling
    /// edge of `enable_clear` after a high pulse acknowledges the last
    /// delivered byte.
    pub fn handle_control(&mut self, enable_clear: bool, clock_line: bool) {
        if self.enable_clear && !enable_clear {
            self.waiting_for_ack = false;
        }
        if self.clock_line != clock_line {
            self.clock_low_ms = 0;
        }
        self.enable_clear = enable_clear;
        self.clock_line = clock_line;
    }

    /// One millisecond of keyboard time.
    ///
    /// While the clock line is held low, delivery is suspended and the
    /// reset timer runs; at the threshold the FIFO is cleared and a
    /// single self-test byte queued. Otherwise, delivers the FIFO head
    /// when permitted and returns it for the platform to latch and
    /// raise IRQ 1.
    pub fn tick_ms(&mut self) -> Option<u8> {
        if !self.clock_line {
            self.clock_low_ms += 1;
            if self.clock_low_ms == RESET_THRESHOLD_MS {
                self.head = 0;
                self.len = 0;
                self.enqueue(SELF_TEST_OK);
            }
            return None;
        }

        if self.enable_clear || self.waiting_for_ack {
            return None;
        }

        let scancode = self.dequeue()?;
        self.waiting_for_ack = true;
        Some(scancode)
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}
