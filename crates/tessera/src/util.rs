use ash::vk;

///Viewport covering all of `extent` with the default depth range of 0..1.
pub fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

///Scissor rectangle covering all of `extent`.
pub fn scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

///Width over height. 1.0 for a degenerated extent.
pub fn aspect_ratio(extent: vk::Extent2D) -> f32 {
    if extent.height == 0 {
        1.0
    } else {
        extent.width as f32 / extent.height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_extent() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let vp = viewport(extent);
        assert_eq!((vp.width, vp.height), (800.0, 600.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
        let sc = scissor(extent);
        assert_eq!(sc.extent, extent);
        assert_eq!((sc.offset.x, sc.offset.y), (0, 0));
        assert!((aspect_ratio(extent) - 4.0 / 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn zero_height_ratio() {
        assert_eq!(
            aspect_ratio(vk::Extent2D {
                width: 10,
                height: 0
            }),
            1.0
        );
    }
}
