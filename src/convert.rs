//! Integer sample width conversion
//!
//! An AAF listener may receive wider or narrower integer samples than its
//! own stream format. Per Clause 7.3.4 a narrow sample widens by appending
//! zero bytes, and a wide sample narrows by dropping its trailing bytes.
//! The conversion is channel- and endianness-agnostic: it walks the payload
//! in sample-sized slabs in wire order.

/// Convert packed samples from `in_width` to `out_width` bytes per sample.
///
/// `src` must hold a whole number of input samples and `dst` exactly the
/// corresponding number of output samples. Returns the bytes written.
pub fn convert_width(src: &[u8], in_width: usize, dst: &mut [u8], out_width: usize) -> usize {
    debug_assert!(in_width > 0 && out_width > 0);
    debug_assert_eq!(src.len() % in_width, 0);
    debug_assert_eq!(dst.len(), src.len() / in_width * out_width);

    let mut written = 0;
    if in_width < out_width {
        for sample in src.chunks_exact(in_width) {
            dst[written..written + in_width].copy_from_slice(sample);
            dst[written + in_width..written + out_width].fill(0);
            written += out_width;
        }
    } else {
        for sample in src.chunks_exact(in_width) {
            dst[written..written + out_width].copy_from_slice(&sample[..out_width]);
            written += out_width;
        }
    }
    written
}
