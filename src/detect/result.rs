use serde::Serialize;

/// Axis-aligned box in integer frame pixels, `(x1, y1)` top-left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Signed area; inverted boxes yield a non-positive value.
    pub fn area(&self) -> i64 {
        (self.x2 - self.x1) as i64 * (self.y2 - self.y1) as i64
    }
}

/// A person found in one frame. Lives for a single pipeline cycle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Backend output before class and confidence filtering.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class: ObjectClass,
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectClass {
    Person,
    Vehicle,
    Animal,
    Unknown,
}

impl ObjectClass {
    /// Map a COCO-80 class index.
    pub fn from_coco(index: usize) -> Self {
        match index {
            0 => ObjectClass::Person,
            1..=8 => ObjectClass::Vehicle,
            14..=23 => ObjectClass::Animal,
            _ => ObjectClass::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_class_zero_is_person() {
        assert_eq!(ObjectClass::from_coco(0), ObjectClass::Person);
        assert_eq!(ObjectClass::from_coco(2), ObjectClass::Vehicle);
        assert_eq!(ObjectClass::from_coco(16), ObjectClass::Animal);
        assert_eq!(ObjectClass::from_coco(79), ObjectClass::Unknown);
    }

    #[test]
    fn bbox_area_is_width_times_height() {
        assert_eq!(BoundingBox::new(10, 20, 60, 70).area(), 2500);
        assert_eq!(BoundingBox::new(5, 5, 5, 40).area(), 0);
    }
}
