//! Tensor preparation and decoding shared by the ONNX backends.
#![cfg_attr(not(feature = "onnx"), allow(dead_code))]

use image::{imageops, imageops::FilterType, Rgb, RgbImage};

use crate::plate::BoundingBox;

use super::{RegionProposal, TextReading};

pub const DETECTOR_INPUT_SIZE: u32 = 640;
pub const NMS_IOU_THRESHOLD: f32 = 0.45;
const LETTERBOX_FILL: u8 = 114;

/// Maps model-space coordinates back onto the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resizes into a square canvas keeping aspect ratio and returns the CHW
/// tensor normalised to `[0, 1]`.
pub fn letterbox(frame: &RgbImage, size: u32) -> (Vec<f32>, Letterbox) {
    let (src_w, src_h) = frame.dimensions();
    let scale = (size as f32 / src_w.max(1) as f32).min(size as f32 / src_h.max(1) as f32);
    let scaled_w = ((src_w as f32 * scale) as u32).clamp(1, size);
    let scaled_h = ((src_h as f32 * scale) as u32).clamp(1, size);
    let pad_x = (size - scaled_w) / 2;
    let pad_y = (size - scaled_h) / 2;

    let resized = imageops::resize(frame, scaled_w, scaled_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let tensor = to_chw(&canvas);
    (
        tensor,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Stretches a crop to `width x height` and returns the CHW tensor in `[0, 1]`.
pub fn resize_to_tensor(crop: &RgbImage, width: u32, height: u32) -> Vec<f32> {
    let resized = imageops::resize(crop, width, height, FilterType::Triangle);
    to_chw(&resized)
}

fn to_chw(image: &RgbImage) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let plane = (w * h) as usize;
    let mut tensor = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = (y * w + x) as usize;
        for c in 0..3 {
            tensor[c * plane + idx] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Decodes a YOLOv8 style `[1, 4 + classes, anchors]` output. Every class is
/// treated as "plate"; the best class score is the proposal confidence.
pub fn decode_yolo(
    data: &[f32],
    channels: usize,
    anchors: usize,
    letterbox: Letterbox,
    min_confidence: f32,
) -> Vec<RegionProposal> {
    if channels < 5 || data.len() < channels * anchors {
        return Vec::new();
    }

    let mut boxes = Vec::new();
    for i in 0..anchors {
        let score = (4..channels)
            .map(|c| data[c * anchors + i])
            .fold(f32::NEG_INFINITY, f32::max);
        if !(score >= min_confidence) {
            continue;
        }

        let cx = data[i];
        let cy = data[anchors + i];
        let w = data[2 * anchors + i];
        let h = data[3 * anchors + i];

        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);
        boxes.push(([x1, y1, x2, y2], score));
    }

    nms(boxes, NMS_IOU_THRESHOLD)
        .into_iter()
        .filter_map(|([x1, y1, x2, y2], confidence)| {
            let bbox = BoundingBox::from_corners(x1, y1, x2, y2);
            (!bbox.is_empty()).then_some(RegionProposal { bbox, confidence })
        })
        .collect()
}

/// Greedy non-maximum suppression over `[x1, y1, x2, y2]` boxes.
pub fn nms(mut boxes: Vec<([f32; 4], f32)>, iou_threshold: f32) -> Vec<([f32; 4], f32)> {
    boxes.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut keep: Vec<([f32; 4], f32)> = Vec::new();
    for candidate in boxes {
        if keep
            .iter()
            .all(|kept| iou(&kept.0, &candidate.0) < iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Best-path CTC decoding of `[steps, classes]` probabilities where class 0 is
/// the blank and class `k` maps to `charset[k - 1]`. The confidence is the
/// mean probability of the emitted symbols.
pub fn ctc_greedy_decode(
    probs: &[f32],
    steps: usize,
    classes: usize,
    charset: &[char],
) -> Option<TextReading> {
    if classes == 0 || probs.len() < steps * classes {
        return None;
    }

    let mut text = String::new();
    let mut confidence_sum = 0.0f32;
    let mut previous = 0usize;

    for step in 0..steps {
        let row = &probs[step * classes..(step + 1) * classes];
        let (best, prob) = row
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        if best != 0 && best != previous {
            if let Some(symbol) = charset.get(best - 1) {
                text.push(*symbol);
                confidence_sum += prob;
            }
        }
        previous = best;
    }

    if text.is_empty() {
        return None;
    }

    let confidence = confidence_sum / text.chars().count() as f32;
    Some(TextReading { text, confidence })
}

/// Expands range notation such as `0-9A-Z` into the symbol list.
pub fn expand_charset(notation: &str) -> Vec<char> {
    let chars: Vec<char> = notation.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if i + 2 < chars.len() && chars[i + 1] == '-' && chars[i] < chars[i + 2] {
            out.extend(chars[i]..=chars[i + 2]);
            i += 3;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        assert!((iou(&a, &[5.0, 0.0, 15.0, 10.0]) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_strongest_of_overlapping_boxes() {
        let kept = nms(
            vec![
                ([0.0, 0.0, 10.0, 10.0], 0.6),
                ([1.0, 1.0, 11.0, 11.0], 0.9),
                ([50.0, 50.0, 60.0, 60.0], 0.7),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].1 - 0.9).abs() < f32::EPSILON);
        assert!((kept[1].1 - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn letterbox_pads_the_short_side() {
        let frame = RgbImage::new(1280, 640);
        let (tensor, lb) = letterbox(&frame, DETECTOR_INPUT_SIZE);
        assert_eq!(tensor.len(), 3 * 640 * 640);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 160.0);
        assert_eq!(lb.unmap(320.0, 320.0), (640.0, 320.0));
    }

    #[test]
    fn decode_yolo_filters_and_unmaps() {
        let anchors = 3;
        let channels = 5;
        let mut data = vec![0.0f32; channels * anchors];
        // anchor 0: confident box centred at (100, 200) size 40x20
        data[0] = 100.0;
        data[anchors] = 200.0;
        data[2 * anchors] = 40.0;
        data[3 * anchors] = 20.0;
        data[4 * anchors] = 0.9;
        // anchor 1: below threshold
        data[4 * anchors + 1] = 0.2;

        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let proposals = decode_yolo(&data, channels, anchors, lb, 0.5);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].bbox, BoundingBox::new(80, 190, 40, 20));
        assert!((proposals[0].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn ctc_collapses_repeats_and_blanks() {
        let charset = expand_charset("0-9A-Z");
        let classes = charset.len() + 1;
        // A A blank A 1 1
        let a = 1 + charset.iter().position(|c| *c == 'A').unwrap();
        let one = 1 + charset.iter().position(|c| *c == '1').unwrap();
        let path = [a, a, 0, a, one, one];
        let mut probs = vec![0.0f32; path.len() * classes];
        for (step, class) in path.iter().enumerate() {
            probs[step * classes + class] = 0.8;
        }

        let reading = ctc_greedy_decode(&probs, path.len(), classes, &charset).unwrap();
        assert_eq!(reading.text, "AA1");
        assert!((reading.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn ctc_all_blank_is_none() {
        let probs = vec![1.0, 0.0, 1.0, 0.0];
        assert!(ctc_greedy_decode(&probs, 2, 2, &['A']).is_none());
    }

    #[test]
    fn charset_ranges_expand() {
        assert_eq!(expand_charset("0-9A-Z").len(), 36);
        assert_eq!(expand_charset("AB-"), vec!['A', 'B', '-']);
    }
}
