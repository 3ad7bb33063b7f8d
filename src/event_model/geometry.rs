use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// 从 `self` 指向 `other` 的角度 (弧度)
    pub fn angle_to(&self, other: &Point) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// `getBoundingClientRect` 风格的矩形, 原点在左上角
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// 边界上的点也算在内
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// 把相对坐标夹到 `[0, width] x [0, height]`
    pub fn clamp_local(&self, point: Point) -> Point {
        Point::new(
            point.x.clamp(0.0, self.width.max(0.0)),
            point.y.clamp(0.0, self.height.max(0.0)),
        )
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_local_keeps_points_inside() {
        let rect = Rect::new(0.0, 0.0, 800.0, 600.0);
        assert_eq!(rect.clamp_local(Point::new(900.0, 700.0)), Point::new(800.0, 600.0));
        assert_eq!(rect.clamp_local(Point::new(-50.0, -100.0)), Point::new(0.0, 0.0));
        assert_eq!(rect.clamp_local(Point::new(12.5, 40.0)), Point::new(12.5, 40.0));
    }

    #[test]
    fn contains_rect_requires_full_overlap() {
        let outer = Rect::new(10.0, 10.0, 100.0, 100.0);
        assert!(outer.contains_rect(&Rect::new(20.0, 20.0, 10.0, 10.0)));
        assert!(!outer.contains_rect(&Rect::new(100.0, 100.0, 20.0, 20.0)));
        assert!(outer.contains(Point::new(110.0, 110.0)));
    }

    #[test]
    fn point_math() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_eq!(a.distance_to(&b), 5.0);
        assert_eq!(a.midpoint(&b), Point::new(1.5, 2.0));
    }
}
