use ab_glyph::{FontRef, PxScale};
use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detector::{DetectionRecord, Frame};

/// Box colors; the class label picks one so a class keeps its color across frames
const PALETTE: [Rgb<u8>; 6] = [
    Rgb([230, 57, 70]),
    Rgb([42, 157, 143]),
    Rgb([233, 196, 106]),
    Rgb([69, 123, 157]),
    Rgb([244, 162, 97]),
    Rgb([131, 56, 236]),
];

const LABEL_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");
const LABEL_SCALE: f32 = 14.0;
const LABEL_PAD: u32 = 2;
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

/// Height of the plain tab drawn when no font is available
const TAB_HEIGHT: u32 = 6;

fn color_for(label: &str) -> Rgb<u8> {
    let sum: usize = label.bytes().map(usize::from).sum();
    PALETTE[sum % PALETTE.len()]
}

fn label_font() -> Option<FontRef<'static>> {
    FontRef::try_from_slice(LABEL_FONT).ok()
}

/// "class confidence", as shown on the tab
pub fn label_text(record: &DetectionRecord) -> String {
    format!("{} {:.2}", record.class_name_or_unknown(), record.confidence())
}

/// Filled tab carrying `text`, above the box when it fits, else inside its top edge
fn draw_label(image: &mut Frame, font: &FontRef<'_>, x: i32, box_top: i32, color: Rgb<u8>, text: &str) {
    let scale = PxScale::from(LABEL_SCALE);
    let (text_w, text_h) = text_size(scale, font, text);
    let tab_w = (text_w + 2 * LABEL_PAD).max(1);
    let tab_h = (text_h + 2 * LABEL_PAD).max(1);

    let tab_y = if box_top >= tab_h as i32 {
        box_top - tab_h as i32
    } else {
        box_top
    };

    draw_filled_rect_mut(image, Rect::at(x, tab_y).of_size(tab_w, tab_h), color);
    draw_text_mut(
        image,
        LABEL_TEXT,
        x + LABEL_PAD as i32,
        tab_y + LABEL_PAD as i32,
        scale,
        font,
        text,
    );
}

/// Copy of `frame` with every boxed record outlined and labelled
pub fn draw_detections(frame: &Frame, records: &[DetectionRecord]) -> Frame {
    let mut image = frame.clone();
    let (img_w, img_h) = image.dimensions();
    if img_w == 0 || img_h == 0 {
        return image;
    }

    let font = label_font();

    for record in records {
        let Some(bbox) = record.bbox() else {
            continue;
        };

        // clamp to the frame; boxes from the model may overshoot the border
        let x1 = bbox.x1().max(0.0).min(img_w as f64 - 1.0) as i32;
        let y1 = bbox.y1().max(0.0).min(img_h as f64 - 1.0) as i32;
        let x2 = bbox.x2().max(0.0).min(img_w as f64 - 1.0) as i32;
        let y2 = bbox.y2().max(0.0).min(img_h as f64 - 1.0) as i32;

        let width = (x2 - x1).max(0) as u32;
        let height = (y2 - y1).max(0) as u32;
        if width == 0 || height == 0 {
            continue;
        }

        let label = record.class_name_or_unknown();
        let color = color_for(&label);
        draw_hollow_rect_mut(&mut image, Rect::at(x1, y1).of_size(width, height), color);

        // second outline for visibility
        if width > 2 && height > 2 {
            let inner = Rect::at(x1 + 1, y1 + 1).of_size(width - 2, height - 2);
            draw_hollow_rect_mut(&mut image, inner, color);
        }

        match &font {
            Some(font) => draw_label(&mut image, font, x1, y1, color, &label_text(record)),
            None => {
                let tab_y = (y1 - TAB_HEIGHT as i32).max(0);
                let tab_w = (width / 3).max(1);
                draw_filled_rect_mut(&mut image, Rect::at(x1, tab_y).of_size(tab_w, TAB_HEIGHT), color);
            }
        }
    }

    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::detection_models::BoundingBox;

    #[test]
    fn outlines_boxes_without_touching_the_input() {
        let frame = Frame::new(200, 200);
        let record = DetectionRecord::normalized("fire", 0.9, Some(BoundingBox([4.0, 60.0, 60.0, 120.0])));

        let out = draw_detections(&frame, &[record]);

        assert_eq!(frame.get_pixel(4, 60), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(4, 60), &color_for("fire"));
        assert_eq!(out.get_pixel(30, 100), &Rgb([0, 0, 0]));
    }

    #[test]
    fn label_names_class_and_confidence() {
        let record = DetectionRecord::normalized("animal", 0.875, None);
        assert_eq!(label_text(&record), "animal 0.88");
    }

    #[test]
    fn label_text_is_drawn_above_the_box() {
        let font = label_font().expect("embedded font parses");
        let (text_w, text_h) = text_size(PxScale::from(LABEL_SCALE), &font, "fire 0.90");
        let tab_w = text_w + 2 * LABEL_PAD;
        let tab_h = text_h + 2 * LABEL_PAD;

        let frame = Frame::new(200, 200);
        let record = DetectionRecord::normalized("fire", 0.9, Some(BoundingBox([10.0, 60.0, 150.0, 120.0])));
        let out = draw_detections(&frame, &[record]);

        let color = color_for("fire");
        let tab_top = 60 - tab_h;
        assert_eq!(out.get_pixel(10, tab_top), &color);

        let text_pixels = (tab_top..60)
            .flat_map(|y| (10..10 + tab_w).map(move |x| (x, y)))
            .filter(|&(x, y)| {
                let p = out.get_pixel(x, y);
                p != &color && p != &Rgb([0, 0, 0])
            })
            .count();
        assert!(text_pixels > 0);
    }

    #[test]
    fn label_moves_inside_a_box_at_the_top_edge() {
        let font = label_font().expect("embedded font parses");
        let (text_w, text_h) = text_size(PxScale::from(LABEL_SCALE), &font, "human 0.50");
        let corner_x = 10 + text_w + 2 * LABEL_PAD - 1;
        let corner_y = text_h + 2 * LABEL_PAD - 1;

        let frame = Frame::new(200, 200);
        let record = DetectionRecord::normalized("human", 0.5, Some(BoundingBox([10.0, 0.0, 150.0, 100.0])));
        let out = draw_detections(&frame, &[record]);

        assert_eq!(out.get_pixel(corner_x, corner_y), &color_for("human"));
        assert_eq!(out.get_pixel(corner_x + 2, corner_y + 2), &Rgb([0, 0, 0]));
    }

    #[test]
    fn degenerate_and_outside_boxes_are_skipped() {
        let frame = Frame::new(16, 16);
        let records = vec![
            DetectionRecord::normalized("human", 0.5, Some(BoundingBox([5.0, 5.0, 5.0, 9.0]))),
            DetectionRecord::normalized("human", 0.5, Some(BoundingBox([40.0, 40.0, 80.0, 80.0]))),
            DetectionRecord::normalized("human", 0.5, None),
        ];

        assert_eq!(draw_detections(&frame, &records), frame);
    }

    #[test]
    fn same_class_same_color() {
        assert_eq!(color_for("animal"), color_for("animal"));
    }
}
