use crate::braille::BrailleCanvas;
use crate::map::projection::Viewport;

/// Draw a line using Bresenham's algorithm
pub fn draw_line(canvas: &mut BrailleCanvas, x0: i32, y0: i32, x1: i32, y1: i32) {
    walk_line(x0, y0, x1, y1, |x, y, _| canvas.set_pixel_signed(x, y));
}

/// Bresenham walk calling `plot(x, y, step)` for every pixel from start to end
fn walk_line(x0: i32, y0: i32, x1: i32, y1: i32, mut plot: impl FnMut(i32, i32, usize)) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    let mut x = x0;
    let mut y = y0;
    let mut step = 0;

    loop {
        plot(x, y, step);
        step += 1;

        if x == x1 && y == y1 {
            break;
        }

        let e2 = 2 * err;

        if e2 >= dy {
            if x == x1 {
                break;
            }
            err += dy;
            x += sx;
        }

        if e2 <= dx {
            if y == y1 {
                break;
            }
            err += dx;
            y += sy;
        }
    }
}

/// Heavier line for emphasized trails and wide strokes
pub fn draw_thick_line(canvas: &mut BrailleCanvas, x0: i32, y0: i32, x1: i32, y1: i32) {
    draw_line(canvas, x0, y0, x1, y1);
    draw_line(canvas, x0 + 1, y0, x1 + 1, y1);
    draw_line(canvas, x0, y0 + 1, x1, y1 + 1);
}

/// Line drawn `on` pixels, skipped `off` pixels, repeating
pub fn draw_dashed_line(
    canvas: &mut BrailleCanvas,
    (x0, y0): (i32, i32),
    (x1, y1): (i32, i32),
    on: usize,
    off: usize,
) {
    let period = (on + off).max(1);
    walk_line(x0, y0, x1, y1, |x, y, step| {
        if step % period < on {
            canvas.set_pixel_signed(x, y);
        }
    });
}

/// Filled disc
pub fn draw_circle(canvas: &mut BrailleCanvas, cx: i32, cy: i32, radius: i32) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                canvas.set_pixel_signed(cx + dx, cy + dy);
            }
        }
    }
}

/// One-pixel circle outline
pub fn draw_ring(canvas: &mut BrailleCanvas, cx: i32, cy: i32, radius: i32) {
    let inner = (radius - 1).max(0);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d2 = dx * dx + dy * dy;
            if d2 <= radius * radius && d2 > inner * inner {
                canvas.set_pixel_signed(cx + dx, cy + dy);
            }
        }
    }
}

/// Project and draw a geographic polyline, skipping segments that are off
/// screen or longer than the viewport is wide
pub fn draw_polyline(
    canvas: &mut BrailleCanvas,
    points: impl IntoIterator<Item = (f64, f64)>,
    viewport: &Viewport,
    thick: bool,
) {
    let mut prev: Option<(i32, i32)> = None;
    for (lon, lat) in points {
        let (px, py) = viewport.project(lon, lat);
        if let Some((prev_x, prev_y)) = prev {
            let dist = ((px - prev_x).abs() + (py - prev_y).abs()) as usize;
            if dist < viewport.width * 2 && viewport.line_might_be_visible((prev_x, prev_y), (px, py)) {
                if thick {
                    draw_thick_line(canvas, prev_x, prev_y, px, py);
                } else {
                    draw_line(canvas, prev_x, prev_y, px, py);
                }
            }
        }
        prev = Some((px, py));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizontal_line() {
        let mut canvas = BrailleCanvas::new(5, 1);
        draw_line(&mut canvas, 0, 0, 9, 0);
        assert_eq!(canvas.to_string(), "⠉⠉⠉⠉⠉");
    }

    #[test]
    fn test_vertical_line() {
        let mut canvas = BrailleCanvas::new(1, 2);
        draw_line(&mut canvas, 0, 0, 0, 7);
        assert_eq!(canvas.to_string(), "⡇\n⡇");
    }

    #[test]
    fn test_dashed_line_leaves_gaps() {
        let mut canvas = BrailleCanvas::new(4, 1);
        draw_dashed_line(&mut canvas, (0, 0), (7, 0), 2, 2);
        assert_eq!(canvas.to_string(), "⠉⠀⠉⠀");
    }

    #[test]
    fn test_ring_is_hollow() {
        let mut canvas = BrailleCanvas::new(10, 5);
        draw_ring(&mut canvas, 10, 10, 4);
        let mut filled = BrailleCanvas::new(10, 5);
        draw_circle(&mut filled, 10, 10, 4);

        assert!(!canvas.is_empty());
        assert_eq!(canvas.char_at(5, 2), None);
        assert!(filled.char_at(5, 2).is_some());
    }
}
