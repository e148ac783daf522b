/// Accumulates raw response bytes and hands out complete lines. Bytes are
/// only decoded once their newline has arrived, so a character split across
/// two network chunks is decoded whole.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left after the stream ended without a final newline.
    pub fn take_rest(&mut self) -> String {
        let rest = std::mem::take(&mut self.buf);
        String::from_utf8_lossy(&rest).into_owned()
    }
}
