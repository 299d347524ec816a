//! Software frame scaling
//!
//! Bilinear RGB32 scaling of decoded frames into the mode's active
//! resolution, honouring the source pixel aspect ratio with optional
//! letterbox or pillarbox framing. Codec decoding is external; the
//! scaler is ours because its output geometry is dictated by the TV
//! mode, not by the source.

use rastertx_core::source::VideoFrame;
use rastertx_core::types::Rational;

/// How the source picture maps into the 4:3 active region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Stretch to fill the full active region
    #[default]
    Fill,
    /// Preserve aspect, black bars above and below
    Letterbox,
    /// Preserve aspect, black bars at the sides
    Pillarbox,
}

/// The scaler: fixed output geometry, reusable across frames.
#[derive(Debug, Clone)]
pub struct Scaler {
    out_width: u32,
    out_height: u32,
    framing: Framing,
}

impl Scaler {
    pub fn new(out_width: u32, out_height: u32, framing: Framing) -> Self {
        Self { out_width, out_height, framing }
    }

    /// Destination rectangle for a source of the given geometry.
    fn target_rect(&self, src_w: u32, src_h: u32, par: Rational) -> (u32, u32, u32, u32) {
        let (ow, oh) = (self.out_width, self.out_height);
        match self.framing {
            Framing::Fill => (0, 0, ow, oh),
            Framing::Letterbox => {
                // Fit the source width; the used height preserves the
                // display aspect within the 4:3 raster
                let dar = par.to_f64() * src_w as f64 / src_h as f64;
                let h = (oh as f64 * (4.0 / 3.0) / dar).min(oh as f64).round() as u32;
                (0, (oh - h) / 2, ow, h.max(1))
            }
            Framing::Pillarbox => {
                let dar = par.to_f64() * src_w as f64 / src_h as f64;
                let w = (ow as f64 * dar / (4.0 / 3.0)).min(ow as f64).round() as u32;
                ((ow - w) / 2, 0, w.max(1), oh)
            }
        }
    }

    /// Scale `src` into a fresh output frame.
    pub fn scale(&self, src: &VideoFrame) -> VideoFrame {
        let mut dst = VideoFrame::black(self.out_width, self.out_height);
        dst.pts = src.pts;
        dst.interlace = src.interlace;
        dst.pixel_aspect = Rational::new(1, 1);

        if src.width == 0 || src.height == 0 {
            return dst;
        }
        let (rx, ry, rw, rh) = self.target_rect(src.width, src.height, src.pixel_aspect);

        for dy in 0..rh {
            let sy = dy as f64 * (src.height - 1).max(1) as f64 / (rh - 1).max(1) as f64;
            let y0 = sy.floor() as u32;
            let y1 = (y0 + 1).min(src.height - 1);
            let ty = sy - y0 as f64;
            for dx in 0..rw {
                let sx = dx as f64 * (src.width - 1).max(1) as f64 / (rw - 1).max(1) as f64;
                let x0 = sx.floor() as u32;
                let x1 = (x0 + 1).min(src.width - 1);
                let tx = sx - x0 as f64;

                let p = bilinear(
                    src.pixel(x0, y0),
                    src.pixel(x1, y0),
                    src.pixel(x0, y1),
                    src.pixel(x1, y1),
                    tx,
                    ty,
                );
                let di = ((ry + dy) * self.out_width + rx + dx) as usize;
                dst.data[di] = p;
            }
        }
        dst
    }
}

#[inline]
fn lerp_channel(a: u32, b: u32, t: f64) -> f64 {
    a as f64 + (b as f64 - a as f64) * t
}

#[inline]
fn bilinear(p00: u32, p10: u32, p01: u32, p11: u32, tx: f64, ty: f64) -> u32 {
    let mut out = 0u32;
    for shift in [16u32, 8, 0] {
        let top = lerp_channel((p00 >> shift) & 0xFF, (p10 >> shift) & 0xFF, tx);
        let bottom = lerp_channel((p01 >> shift) & 0xFF, (p11 >> shift) & 0xFF, tx);
        let v = (top + (bottom - top) * ty).round().clamp(0.0, 255.0) as u32;
        out |= v << shift;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgb: u32) -> VideoFrame {
        let mut f = VideoFrame::black(w, h);
        f.data.iter_mut().for_each(|p| *p = rgb);
        f
    }

    #[test]
    fn test_fill_scales_solid_colour() {
        let scaler = Scaler::new(384, 288, Framing::Fill);
        let out = scaler.scale(&solid(100, 60, 0x00AA_BB_CC));
        assert_eq!(out.width, 384);
        assert_eq!(out.height, 288);
        assert!(out.data.iter().all(|&p| p == 0x00AA_BB_CC));
    }

    #[test]
    fn test_bilinear_midpoint() {
        let p = bilinear(0x000000, 0x0000FF, 0x000000, 0x0000FF, 0.5, 0.0);
        assert_eq!(p & 0xFF, 128);
    }

    #[test]
    fn test_letterbox_leaves_bars() {
        let scaler = Scaler::new(384, 288, Framing::Letterbox);
        // 16:9 source into a 4:3 raster: bars above and below
        let out = scaler.scale(&solid(640, 360, 0x00FF_FF_FF));
        assert_eq!(out.data[0], 0, "top bar must stay black");
        let mid = (144 * 384 + 192) as usize;
        assert_eq!(out.data[mid], 0x00FF_FF_FF);
        let last = out.data.len() - 1;
        assert_eq!(out.data[last], 0, "bottom bar must stay black");
    }

    #[test]
    fn test_pillarbox_leaves_side_bars() {
        let scaler = Scaler::new(384, 288, Framing::Pillarbox);
        // Narrow 1:1 source: bars at the sides
        let out = scaler.scale(&solid(100, 100, 0x00FF_00_00));
        assert_eq!(out.data[144 * 384], 0, "left bar must stay black");
        assert_eq!(out.data[144 * 384 + 192], 0x00FF_00_00);
    }

    #[test]
    fn test_upscale_preserves_range() {
        let mut src = VideoFrame::black(2, 2);
        src.data = vec![0x000000, 0xFFFFFF, 0xFFFFFF, 0x000000];
        let scaler = Scaler::new(16, 16, Framing::Fill);
        let out = scaler.scale(&src);
        assert!(out.data.iter().all(|&p| {
            let r = (p >> 16) & 0xFF;
            r <= 255
        }));
        // Corners keep their source values
        assert_eq!(out.data[0], 0x000000);
        assert_eq!(out.data[15], 0xFFFFFF);
    }
}
