//! Face alignment and paste-back via 4-DOF similarity transforms.
//!
//! Detected faces are warped onto a canonical 512×512 five-point template
//! before restoration; the inverse transform composites each restored face
//! back into the (possibly upscaled) frame under a feathered edge mask.

use image::{Rgb, RgbImage};

/// Canonical five-point face template for a 512×512 restoration crop.
pub const FACE_TEMPLATE_512: [(f32, f32); 5] = [
    (192.98138, 239.94708), // left eye
    (318.90277, 240.19360), // right eye
    (256.63416, 314.01935), // nose
    (201.26117, 371.41043), // left mouth
    (313.08905, 371.15118), // right mouth
];

/// Edge length of the canonical face crop.
pub const FACE_SIZE: u32 = 512;

/// Width of the feathered band at the crop border during paste-back.
/// Wide enough to hide the warp boundary, narrow enough to keep restored
/// detail at the chin and forehead.
const FEATHER_PX: f32 = 24.0;

/// A 4-DOF similarity transform (uniform scale, rotation, translation):
///
/// ```text
/// | a  -b |         | tx |
/// | b   a | * p  +  | ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    pub const IDENTITY: Similarity = Similarity {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Least-squares estimate of the transform mapping `src` points onto
    /// `dst` points.
    ///
    /// Builds the 4×4 normal equations of the overdetermined system (two
    /// rows per point pair) and solves by Gaussian elimination with partial
    /// pivoting. Falls back to the identity on a degenerate system.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
        let mut ata = [[0.0f32; 4]; 4];
        let mut atb = [0.0f32; 4];

        for i in 0..5 {
            let (sx, sy) = src[i];
            let (dx, dy) = dst[i];
            // sx*a - sy*b + tx = dx
            // sy*a + sx*b + ty = dy
            let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
            for (row, rhs) in rows {
                for j in 0..4 {
                    for k in 0..4 {
                        ata[j][k] += row[j] * row[k];
                    }
                    atb[j] += row[j] * rhs;
                }
            }
        }

        match solve_4x4(ata, atb) {
            Some([a, b, tx, ty]) => Similarity { a, b, tx, ty },
            None => Similarity::IDENTITY,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse transform. The 2×2 block of a similarity inverts in closed
    /// form with determinant `a² + b²`; a degenerate transform inverts to
    /// the identity.
    pub fn inverse(&self) -> Similarity {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return Similarity::IDENTITY;
        }
        let ia = self.a / det;
        let ib = -self.b / det;
        Similarity {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        }
    }

    /// Uniform scale factor of the transform.
    pub fn scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}

fn solve_4x4(ata: [[f32; 4]; 4], atb: [f32; 4]) -> Option<[f32; 4]> {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    Some(x)
}

/// Bilinear sample with black outside the frame.
fn sample(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |ix: i64, iy: i64| -> [f32; 3] {
        if ix >= 0 && ix < w && iy >= 0 && iy < h {
            let p = image.get_pixel(ix as u32, iy as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let tl = px(x0, y0);
    let tr = px(x0 + 1, y0);
    let bl = px(x0, y0 + 1);
    let br = px(x0 + 1, y0 + 1);

    let mut out = [0.0f32; 3];
    for c in 0..3 {
        out[c] = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
    }
    out
}

/// Warp a frame region into a `size`×`size` crop under `transform`
/// (frame coordinates → crop coordinates). Out-of-frame pixels are black.
pub fn warp_crop(image: &RgbImage, transform: &Similarity, size: u32) -> RgbImage {
    let inv = transform.inverse();
    let mut out = RgbImage::new(size, size);
    for oy in 0..size {
        for ox in 0..size {
            let (sx, sy) = inv.apply(ox as f32, oy as f32);
            let v = sample(image, sx, sy);
            out.put_pixel(
                ox,
                oy,
                Rgb([
                    v[0].round().clamp(0.0, 255.0) as u8,
                    v[1].round().clamp(0.0, 255.0) as u8,
                    v[2].round().clamp(0.0, 255.0) as u8,
                ]),
            );
        }
    }
    out
}

/// Feather weight for a crop-space position: 0 at the crop border, ramping
/// to 1 over [`FEATHER_PX`]. Positions outside the crop weigh 0.
fn feather(cx: f32, cy: f32, size: f32) -> f32 {
    let edge = cx.min(cy).min(size - 1.0 - cx).min(size - 1.0 - cy);
    (edge / FEATHER_PX).clamp(0.0, 1.0)
}

/// Composite a restored face crop back into `canvas`.
///
/// `transform` maps original-frame coordinates to crop coordinates;
/// `outscale` is the canvas size relative to the original frame. Only the
/// canvas region covered by the warped crop is touched.
pub fn paste_face(canvas: &mut RgbImage, face: &RgbImage, transform: &Similarity, outscale: f32) {
    let size = face.width().min(face.height()) as f32;
    let inv = transform.inverse();

    // Canvas-space bounding box of the crop corners.
    let corners = [(0.0, 0.0), (size, 0.0), (0.0, size), (size, size)]
        .map(|(x, y)| inv.apply(x, y))
        .map(|(x, y)| (x * outscale, y * outscale));
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for (x, y) in corners {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil() as u32 + 1).min(canvas.width());
    let y1 = (max_y.ceil() as u32 + 1).min(canvas.height());

    for py in y0..y1 {
        for px in x0..x1 {
            let (cx, cy) = transform.apply(px as f32 / outscale, py as f32 / outscale);
            if cx < 0.0 || cy < 0.0 || cx >= size || cy >= size {
                continue;
            }
            let alpha = feather(cx, cy, size);
            if alpha <= 0.0 {
                continue;
            }
            let restored = sample(face, cx, cy);
            let base = canvas.get_pixel(px, py).0;
            let blended = Rgb([
                (restored[0] * alpha + base[0] as f32 * (1.0 - alpha))
                    .round()
                    .clamp(0.0, 255.0) as u8,
                (restored[1] * alpha + base[1] as f32 * (1.0 - alpha))
                    .round()
                    .clamp(0.0, 255.0) as u8,
                (restored[2] * alpha + base[2] as f32 * (1.0 - alpha))
                    .round()
                    .clamp(0.0, 255.0) as u8,
            ]);
            canvas.put_pixel(px, py, blended);
        }
    }
}
