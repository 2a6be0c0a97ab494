//! Pixel remapping between output orientations.
//!
//! A captured frame is laid out the way the output scans it out. Before it can
//! be shown on a layer surface it has to be turned into the orientation the
//! compositor presents, which is one of the eight `wl_output` transforms.

use wayland_client::protocol::wl_output;

/// Output orientation (rotation, flipping)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    #[default]
    Normal,
    _90,
    _180,
    _270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl Transform {
    pub const ALL: [Transform; 8] = [
        Self::Normal,
        Self::_90,
        Self::_180,
        Self::_270,
        Self::Flipped,
        Self::Flipped90,
        Self::Flipped180,
        Self::Flipped270,
    ];

    /// Whether width and height trade places under this transform
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Self::_90 | Self::_270 | Self::Flipped90 | Self::Flipped270
        )
    }

    /// The transform that undoes `self`
    pub fn inverse(self) -> Self {
        match self {
            Self::_90 => Self::_270,
            Self::_270 => Self::_90,
            other => other,
        }
    }

    /// Size of an image of `width`x`height` once transformed
    pub fn transformed_size<T>(self, width: T, height: T) -> (T, T) {
        if self.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Destination coordinate of source pixel (`x`, `y`) in a `w`x`h` image
    #[inline]
    fn destination(self, x: usize, y: usize, w: usize, h: usize) -> (usize, usize) {
        match self {
            Self::Normal => (x, y),
            Self::_90 => (h - 1 - y, x),
            Self::_180 => (w - 1 - x, h - 1 - y),
            Self::_270 => (y, w - 1 - x),
            Self::Flipped => (w - 1 - x, y),
            Self::Flipped90 => (y, x),
            Self::Flipped180 => (x, h - 1 - y),
            Self::Flipped270 => (h - 1 - y, w - 1 - x),
        }
    }
}

impl From<wl_output::Transform> for Transform {
    fn from(value: wl_output::Transform) -> Self {
        use wl_output::Transform as WlTransform;

        match value {
            WlTransform::Normal => Self::Normal,
            WlTransform::_90 => Self::_90,
            WlTransform::_180 => Self::_180,
            WlTransform::_270 => Self::_270,
            WlTransform::Flipped => Self::Flipped,
            WlTransform::Flipped90 => Self::Flipped90,
            WlTransform::Flipped180 => Self::Flipped180,
            WlTransform::Flipped270 => Self::Flipped270,
            _ => Self::Normal,
        }
    }
}

/// Copy the tightly packed `width`x`height` image in `src` into `dst`,
/// reoriented by `transform`.
///
/// `dst` receives an image of `transform.transformed_size(width, height)`,
/// also tightly packed. Every destination pixel is written exactly once, and
/// pixels are moved as opaque groups of `bytes_per_pixel` bytes.
///
/// # Panics
///
/// If either slice is shorter than `width * height * bytes_per_pixel`.
pub fn transform(
    dst: &mut [u8],
    src: &[u8],
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    transform: Transform,
) {
    let len = width * height * bytes_per_pixel;
    assert!(src.len() >= len, "source holds {} of {len} bytes", src.len());
    assert!(dst.len() >= len, "destination holds {} of {len} bytes", dst.len());

    if transform == Transform::Normal {
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }

    if len == 0 {
        return;
    }

    let (dst_width, _) = transform.transformed_size(width, height);

    for (index, pixel) in src[..len].chunks_exact(bytes_per_pixel).enumerate() {
        let (x, y) = (index % width, index / width);
        let (new_x, new_y) = transform.destination(x, y, width, height);
        let offset = (new_y * dst_width + new_x) * bytes_per_pixel;

        dst[offset..offset + bytes_per_pixel].copy_from_slice(pixel);
    }
}

/// Mirror the rows of a `height`-row image with `stride` bytes per row, in place
pub fn flip_rows(data: &mut [u8], stride: usize, height: usize) {
    let rows = &mut data[..stride * height];
    for y in 0..height / 2 {
        let (top, bottom) = rows.split_at_mut((height - 1 - y) * stride);
        top[y * stride..(y + 1) * stride].swap_with_slice(&mut bottom[..stride]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 3x2 image, one byte per pixel:
    //   1 2 3
    //   4 5 6
    const SRC: [u8; 6] = [1, 2, 3, 4, 5, 6];

    fn apply(t: Transform) -> Vec<u8> {
        let mut dst = vec![0; SRC.len()];
        transform(&mut dst, &SRC, 3, 2, 1, t);
        dst
    }

    #[test]
    fn test_rotate_90() {
        // 2x3:
        //   4 1
        //   5 2
        //   6 3
        assert_eq!(apply(Transform::_90), vec![4, 1, 5, 2, 6, 3]);
    }

    #[test]
    fn test_rotate_180() {
        assert_eq!(apply(Transform::_180), vec![6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_rotate_270() {
        // 2x3:
        //   3 6
        //   2 5
        //   1 4
        assert_eq!(apply(Transform::_270), vec![3, 6, 2, 5, 1, 4]);
    }

    #[test]
    fn test_flipped_variants() {
        assert_eq!(apply(Transform::Flipped), vec![3, 2, 1, 6, 5, 4]);
        assert_eq!(apply(Transform::Flipped90), vec![1, 4, 2, 5, 3, 6]);
        assert_eq!(apply(Transform::Flipped180), vec![4, 5, 6, 1, 2, 3]);
        assert_eq!(apply(Transform::Flipped270), vec![6, 3, 5, 2, 4, 1]);
    }

    #[test]
    fn test_normal_is_plain_copy() {
        let src: Vec<u8> = (0..=255).collect();
        let mut dst = vec![0; src.len()];
        transform(&mut dst, &src, 8, 8, 4, Transform::Normal);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_whole_pixels_are_moved() {
        // 2x1, four bytes per pixel
        let src = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut dst = [0; 8];
        transform(&mut dst, &src, 2, 1, 4, Transform::Flipped);
        assert_eq!(dst, [5, 6, 7, 8, 1, 2, 3, 4]);
    }

    #[test]
    fn test_transformed_size() {
        assert_eq!(Transform::_90.transformed_size(1080, 1920), (1920, 1080));
        assert_eq!(Transform::_270.transformed_size(1080, 1920), (1920, 1080));
        assert_eq!(Transform::_180.transformed_size(1080, 1920), (1080, 1920));
        assert_eq!(Transform::Flipped90.transformed_size(3, 2), (2, 3));
    }

    #[test]
    fn test_inverse() {
        assert_eq!(Transform::_90.inverse(), Transform::_270);
        assert_eq!(Transform::_270.inverse(), Transform::_90);
        assert_eq!(Transform::Flipped90.inverse(), Transform::Flipped90);
    }

    #[test]
    fn test_empty_image() {
        let mut dst: [u8; 0] = [];
        transform(&mut dst, &[0u8; 0], 0, 0, 4, Transform::_90);
    }

    #[test]
    #[should_panic]
    fn test_short_destination() {
        let mut dst = [0; 5];
        transform(&mut dst, &SRC, 3, 2, 1, Transform::_90);
    }

    #[test]
    fn test_flip_rows() {
        let mut data = vec![1, 2, 0, 3, 4, 0, 5, 6, 0];
        flip_rows(&mut data, 3, 3);
        assert_eq!(data, vec![5, 6, 0, 3, 4, 0, 1, 2, 0]);
    }

    #[test]
    fn test_from_wl_transform() {
        assert_eq!(
            Transform::from(wl_output::Transform::Flipped270),
            Transform::Flipped270
        );
        assert_eq!(Transform::from(wl_output::Transform::_90), Transform::_90);
    }
}
