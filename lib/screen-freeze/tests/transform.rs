// cargo test -p screen-freeze --test transform

use screen_freeze::{Transform, transform};

fn image(width: usize, height: usize, bpp: usize) -> Vec<u8> {
    (0..width * height * bpp).map(|i| (i * 7 % 251) as u8).collect()
}

#[test]
fn test_inverse_restores_original() {
    let (width, height, bpp) = (5, 3, 4);
    let src = image(width, height, bpp);

    for t in Transform::ALL {
        let mut once = vec![0; src.len()];
        transform(&mut once, &src, width, height, bpp, t);

        let (w, h) = t.transformed_size(width, height);
        let mut back = vec![0; src.len()];
        transform(&mut back, &once, w, h, bpp, t.inverse());

        assert_eq!(back, src, "{t:?} then {:?}", t.inverse());
    }
}

#[test]
fn test_flips_are_self_inverse() {
    for t in [
        Transform::Flipped,
        Transform::Flipped90,
        Transform::Flipped180,
        Transform::Flipped270,
    ] {
        assert_eq!(t.inverse(), t);
    }
}

#[test]
fn test_normal_equals_copy() {
    let src = image(7, 4, 3);
    let mut dst = vec![0; src.len()];
    transform(&mut dst, &src, 7, 4, 3, Transform::Normal);
    assert_eq!(dst, src);
}

#[test]
fn test_quarter_turns_swap_dimensions() {
    for t in [Transform::_90, Transform::_270] {
        assert_eq!(t.transformed_size(1080, 1920), (1920, 1080));
    }
}

#[test]
fn test_every_pixel_written_once() {
    // Unique 2-byte pixels, so any pixel written twice leaves another one missing
    let (width, height) = (4, 3);
    let src: Vec<u8> = (0..width * height)
        .flat_map(|i| [i as u8, 0xa0 | i as u8])
        .collect();

    for t in Transform::ALL {
        let mut dst = vec![0; src.len()];
        transform(&mut dst, &src, width, height, 2, t);

        let mut pixels: Vec<_> = dst.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        pixels.sort();
        let expected: Vec<_> = (0..width * height)
            .map(|i| (i as u8, 0xa0 | i as u8))
            .collect();

        assert_eq!(pixels, expected, "{t:?}");
    }
}
