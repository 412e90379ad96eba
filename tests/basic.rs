use palquant::{AbortFlag, Attributes, Error, Image, MemoryOwnership, RGBA};

fn gradient(width: usize, height: usize) -> Vec<RGBA> {
    let mut pixels = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            pixels.push(RGBA {
                r: (x * 255 / width) as u8,
                g: (y * 255 / height) as u8,
                b: 128,
                a: 255,
            });
        }
    }
    pixels
}

#[test]
fn smoke_test_gradient() {
    let (width, height) = (32, 32);
    let pixels = gradient(width, height);

    let attr = Attributes::new();
    let image = Image::new(&attr, &pixels, width, height, 0.0).unwrap();
    let mut result = palquant::quantize(&attr, &image).unwrap();

    let palette_len = result.palette().len();
    assert!((2..=256).contains(&palette_len));

    let mut indexed = vec![0u8; width * height];
    result.write_remapped(&image, &mut indexed).unwrap();
    for &idx in &indexed {
        assert!((idx as usize) < palette_len);
    }
}

#[test]
fn three_pixel_image_keeps_both_colors_exactly() {
    let pixels = [
        RGBA {
            r: 111,
            g: 222,
            b: 33,
            a: 255,
        },
        RGBA {
            r: 255,
            g: 0,
            b: 255,
            a: 255,
        },
        RGBA {
            r: 255,
            g: 0,
            b: 255,
            a: 255,
        },
    ];

    let attr = Attributes::new();
    let image = Image::new(&attr, &pixels, 3, 1, 0.0).unwrap();
    let mut result = palquant::quantize(&attr, &image).unwrap();

    assert_eq!(result.palette().len(), 2);
    assert!(result.quantization_quality().unwrap() > 90);

    let mut indexed = [0u8; 3];
    result.write_remapped(&image, &mut indexed).unwrap();
    assert_eq!(indexed[1], indexed[2]);
    assert_ne!(indexed[0], indexed[1]);

    let palette = result.palette();
    assert!(palette.contains(&pixels[0]));
    assert!(palette.contains(&pixels[1]));
}

#[test]
fn transparent_region_maps_to_one_transparent_entry() {
    let (width, height) = (16, 16);
    let mut pixels = gradient(width, height);
    for y in 0..8 {
        for x in 0..8 {
            pixels[y * width + x].a = 0;
        }
    }

    let attr = Attributes::new();
    let image = Image::new(&attr, &pixels, width, height, 0.0).unwrap();
    let mut result = palquant::quantize(&attr, &image).unwrap();
    let mut indexed = vec![0u8; width * height];
    result.write_remapped(&image, &mut indexed).unwrap();

    let transparent_index = indexed[0];
    assert_eq!(result.palette()[transparent_index as usize].a, 0);
    for y in 0..8 {
        for x in 0..8 {
            assert_eq!(indexed[y * width + x], transparent_index);
        }
    }
    for y in 8..16 {
        for x in 8..16 {
            assert_ne!(indexed[y * width + x], transparent_index);
        }
    }
}

#[test]
fn fixed_color_survives_tiny_palette() {
    let mut attr = Attributes::new();
    attr.set_max_colors(2).unwrap();

    let red = RGBA {
        r: 255,
        g: 0,
        b: 0,
        a: 255,
    };
    let black = RGBA {
        r: 0,
        g: 0,
        b: 0,
        a: 255,
    };
    let pixels = vec![red; 16];
    let mut image = Image::new(&attr, &pixels, 4, 4, 0.0).unwrap();
    image.add_fixed_color(black).unwrap();

    let result = palquant::quantize(&attr, &image).unwrap();
    assert_eq!(result.palette().len(), 2);
    assert!(result.palette().contains(&black));
    assert!(result.palette().contains(&red));
}

#[test]
fn buffer_too_small_is_detected_up_front() {
    let attr = Attributes::new();
    let pixels = gradient(8, 8);
    let image = Image::new(&attr, &pixels, 8, 8, 0.0).unwrap();
    let mut result = palquant::quantize(&attr, &image).unwrap();

    let mut too_small = vec![0u8; 63];
    assert_eq!(
        result.write_remapped(&image, &mut too_small),
        Err(Error::BufferTooSmall)
    );

    // oversized buffers are fine, extra bytes untouched
    let mut oversized = vec![0xABu8; 65];
    result.write_remapped(&image, &mut oversized).unwrap();
    assert_eq!(oversized[64], 0xAB);
}

#[test]
fn abort_flag_cancels_quantization() {
    let mut attr = Attributes::new();
    let flag = AbortFlag::new();
    attr.set_abort_flag(flag.clone());

    let pixels = gradient(16, 16);
    let image = Image::new(&attr, &pixels, 16, 16, 0.0).unwrap();

    flag.abort();
    assert_eq!(
        palquant::quantize(&attr, &image).err(),
        Some(Error::Aborted)
    );
}

#[test]
fn owned_image_outlives_source_buffer() {
    let attr = Attributes::new();
    let image = {
        let pixels = gradient(8, 8);
        Image::new_owned(&attr, pixels, 8, 8, 0.0).unwrap()
    };
    assert_eq!(image.memory_ownership(), MemoryOwnership::EngineCopies);

    let mut result = palquant::quantize(&attr, &image).unwrap();
    let mut indexed = vec![0u8; 64];
    result.write_remapped(&image, &mut indexed).unwrap();
}

#[test]
fn last_index_transparent_moves_entry_to_end() {
    let mut attr = Attributes::new();
    attr.set_last_index_transparent(true);

    let mut pixels = gradient(8, 8);
    pixels[0].a = 0;
    let image = Image::new(&attr, &pixels, 8, 8, 0.0).unwrap();
    let mut result = palquant::quantize(&attr, &image).unwrap();

    let palette = result.palette().to_vec();
    assert_eq!(palette[palette.len() - 1].a, 0);

    let mut indexed = vec![0u8; 64];
    result.write_remapped(&image, &mut indexed).unwrap();
    assert_eq!(indexed[0] as usize, palette.len() - 1);
}
