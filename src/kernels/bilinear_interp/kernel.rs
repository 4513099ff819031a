//! Per-plane bilinear sampling math.
//!
//! A plane is one `[H, W]` channel of one batch element. `x` indexes rows
//! (scaled by `H`), `y` indexes columns (scaled by `W`).


/// Maps a normalized coordinate in `[-1, 1]` onto `[0, extent]`.
#[inline]
pub fn unnormalize(p: f32, extent: usize) -> f32 {
    (p + 1.0) / 2.0 * extent as f32
}

/// `max(0, 1 - |d|)`
#[inline]
pub fn tent(d: f32) -> f32 {
    (1.0 - d.abs()).max(0.0)
}


#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corner {
    pub row: usize,
    pub col: usize,
    /// `x - row`
    pub dx: f32,
    /// `y - col`
    pub dy: f32,
}

impl Corner {
    #[inline]
    pub fn weight_x(&self) -> f32 {
        tent(self.dx)
    }

    #[inline]
    pub fn weight_y(&self) -> f32 {
        tent(self.dy)
    }

    #[inline]
    pub fn weight(&self) -> f32 {
        self.weight_x() * self.weight_y()
    }
}


/// In-bounds corners of the 2x2 neighborhood around `(x, y)`, visited in the
/// order `(m, n)`, `(m + 1, n)`, `(m, n + 1)`, `(m + 1, n + 1)`.
pub fn corners(
    x: f32,
    y: f32,
    height: usize,
    width: usize,
) -> impl Iterator<Item = Corner> {
    let m = x.floor() as i64;
    let n = y.floor() as i64;
    let m1 = m.saturating_add(1);
    let n1 = n.saturating_add(1);

    [(m, n), (m1, n), (m, n1), (m1, n1)]
        .into_iter()
        .filter(move |&(row, col)| {
            row >= 0 && (row as u64) < height as u64
                && col >= 0 && (col as u64) < width as u64
        })
        .map(move |(row, col)| Corner {
            row: row as usize,
            col: col as usize,
            dx: x - row as f32,
            dy: y - col as f32,
        })
}


pub fn sample_plane(
    plane: &[f32],  // [H, W]
    height: usize,
    width: usize,
    x: f32,
    y: f32,
) -> f32 {
    corners(x, y, height, width)
        .fold(0.0, |acc, corner| {
            acc + corner.weight() * plane[corner.row * width + corner.col]
        })
}

/// Scatters `dv` into `plane_grad` and returns the `(dpx, dpy)` contribution.
///
/// The derivative of `max(0, 1 - |x - m|)` is taken by the sign of `m - x`
/// only; the kink at `x == m` resolves to `+` and the clamp at `|x - m| == 1`
/// is not differentiated.
pub fn sample_plane_backward(
    dv: f32,
    plane: &[f32],           // [H, W]
    plane_grad: &mut [f32],  // [H, W]
    height: usize,
    width: usize,
    x: f32,
    y: f32,
) -> (f32, f32) {
    let mut dpx = 0.0;
    let mut dpy = 0.0;

    for corner in corners(x, y, height, width) {
        let idx = corner.row * width + corner.col;
        let value = plane[idx];

        plane_grad[idx] += corner.weight() * dv;

        if corner.dx.abs() < 1.0 {
            let slope = corner.weight_y() * value * dv * height as f32 / 2.0;
            if corner.row as f32 >= x {
                dpx += slope;
            } else {
                dpx -= slope;
            }
        }

        if corner.dy.abs() < 1.0 {
            let slope = corner.weight_x() * value * dv * width as f32 / 2.0;
            if corner.col as f32 >= y {
                dpy += slope;
            } else {
                dpy -= slope;
            }
        }
    }

    (dpx, dpy)
}
