use std::io::{Error, Write};

/// Finalizes a wrapping writer and hands back the inner one.
///
/// Lets the transform pipeline unwind a compressor stack without knowing
/// which concrete encoder it is holding.
pub trait Finish<O> {
    fn finish(self) -> Result<O, Error>;
}

impl<W: Write> Finish<W> for liblzma::write::XzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

impl<W: Write> Finish<W> for flate2::write::GzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_xz_encoder_finish_impl() {
        let cursor = Cursor::new(Vec::new());
        let encoder = liblzma::write::XzEncoder::new(cursor, 1);

        let result = encoder.finish();
        assert!(result.is_ok());
    }

    #[test]
    fn test_gz_encoder_finish_impl() {
        let cursor = Cursor::new(Vec::new());
        let encoder = flate2::write::GzEncoder::new(cursor, flate2::Compression::default());

        let result = encoder.finish();
        assert!(result.is_ok());
    }
}
