use crate::convert::PackedImage;
use crate::frame::Rotation;

/// Rotate an NV21 image clockwise. `R0` hands the input back untouched.
///
/// Luma and the V,U pair grid go through the same index mapping, so each
/// chroma pair stays attached to its 2x2 luma block.
pub fn rotate(image: PackedImage, rotation: Rotation) -> PackedImage {
    if rotation == Rotation::R0 {
        return image;
    }

    let (w, h) = (image.width() as usize, image.height() as usize);
    let (out_w, out_h) = if rotation.swaps_axes() { (h, w) } else { (w, h) };

    let mut out = Vec::with_capacity(image.as_bytes().len());
    rotate_grid::<1>(image.luma(), w, h, rotation, &mut out);
    rotate_grid::<2>(image.chroma(), w / 2, h / 2, rotation, &mut out);

    PackedImage::from_raw_parts(out_w as u32, out_h as u32, out)
}

/// Rotate a `w x h` grid of `N`-byte cells, appending the result row by row.
fn rotate_grid<const N: usize>(src: &[u8], w: usize, h: usize, rotation: Rotation, out: &mut Vec<u8>) {
    let (out_w, out_h) = if rotation.swaps_axes() { (h, w) } else { (w, h) };
    for oy in 0..out_h {
        for ox in 0..out_w {
            let (sx, sy) = match rotation {
                Rotation::R0 => (ox, oy),
                Rotation::R90 => (oy, h - 1 - ox),
                Rotation::R180 => (w - 1 - ox, h - 1 - oy),
                Rotation::R270 => (w - 1 - oy, ox),
            };
            let at = (sy * w + sx) * N;
            out.extend_from_slice(&src[at..at + N]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(w: u32, h: u32) -> PackedImage {
        let len = (w * h * 3 / 2) as usize;
        PackedImage::from_nv21(w, h, (0..len).map(|i| i as u8).collect()).unwrap()
    }

    #[test]
    fn zero_rotation_is_a_no_op() {
        let img = numbered(4, 2);
        let ptr = img.as_bytes().as_ptr();
        let out = rotate(img, Rotation::R0);
        assert_eq!(out.as_bytes().as_ptr(), ptr);
    }

    #[test]
    fn quarter_turns_swap_dimensions() {
        let out = rotate(numbered(4, 2), Rotation::R90);
        assert_eq!((out.width(), out.height()), (2, 4));
        let out = rotate(numbered(4, 2), Rotation::R270);
        assert_eq!((out.width(), out.height()), (2, 4));
        let out = rotate(numbered(4, 2), Rotation::R180);
        assert_eq!((out.width(), out.height()), (4, 2));
    }

    #[test]
    fn ninety_degrees_is_clockwise() {
        // luma 4x2:   0 1 2 3      rotated 2x4:  4 0
        //             4 5 6 7                    5 1
        //                                        6 2
        //                                        7 3
        let out = rotate(numbered(4, 2), Rotation::R90);
        assert_eq!(out.luma(), &[4, 0, 5, 1, 6, 2, 7, 3]);
        // chroma grid 2x1 of pairs (8,9) (10,11) becomes 1x2
        assert_eq!(out.chroma(), &[8, 9, 10, 11]);
    }

    #[test]
    fn one_eighty_reverses_both_axes() {
        let out = rotate(numbered(4, 2), Rotation::R180);
        assert_eq!(out.luma(), &[7, 6, 5, 4, 3, 2, 1, 0]);
        assert_eq!(out.chroma(), &[10, 11, 8, 9]);
    }

    #[test]
    fn rotation_and_its_inverse_restore_the_image() {
        for r in [Rotation::R90, Rotation::R180, Rotation::R270] {
            let original = numbered(6, 4);
            let back = rotate(rotate(original.clone(), r), r.inverse());
            assert_eq!(back, original, "{:?}", r);
        }
    }

    #[test]
    fn four_quarter_turns_are_identity() {
        let original = numbered(8, 4);
        let mut img = original.clone();
        for _ in 0..4 {
            img = rotate(img, Rotation::R90);
        }
        assert_eq!(img, original);
    }
}
