//! Polygon helpers for mask contours.

use imageproc::point::Point;

/// Absolute shoelace area of a closed polygon.
pub(crate) fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0i64;
    for (i, a) in points.iter().enumerate() {
        let b = &points[(i + 1) % points.len()];
        sum += a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64;
    }
    (sum as f64 / 2.0).abs()
}

/// Keeps the part of a convex polygon with `y >= y_min` (Sutherland-Hodgman, one edge).
pub(crate) fn clip_below(points: &[Point<i32>], y_min: f64) -> Vec<Point<i32>> {
    let inside = |p: &Point<i32>| p.y as f64 >= y_min;
    let crossing = |a: &Point<i32>, b: &Point<i32>| {
        let t = (y_min - a.y as f64) / (b.y - a.y) as f64;
        let x = a.x as f64 + t * (b.x - a.x) as f64;
        Point::new(x.round() as i32, y_min.ceil() as i32)
    };

    let mut out = Vec::with_capacity(points.len() + 2);
    for (i, current) in points.iter().enumerate() {
        let previous = &points[(i + points.len() - 1) % points.len()];
        match (inside(previous), inside(current)) {
            (true, true) => out.push(*current),
            (true, false) => out.push(crossing(previous, current)),
            (false, true) => {
                out.push(crossing(previous, current));
                out.push(*current);
            }
            (false, false) => {}
        }
    }
    dedup_closed(out)
}

/// Removes consecutive duplicates, including a last point equal to the first.
pub(crate) fn dedup_closed(mut points: Vec<Point<i32>>) -> Vec<Point<i32>> {
    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}
