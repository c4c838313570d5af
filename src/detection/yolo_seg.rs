// src/detection/yolo_seg.rs
//
// YOLOv8-seg instance segmentation through ONNX Runtime.
//
// Outputs of an Ultralytics seg export:
//   output0: [1, 4 + nc + nm, N]  boxes (cx, cy, w, h), class scores, mask coeffs
//   output1: [1, nm, mh, mw]      mask prototypes (mh = mw = input/4)
//
// Masks are only decoded for classes that need a polygon (road classes);
// the largest external contour of the mask becomes the instance polygon.

use super::types::{names_from_list, parse_names_metadata, Instance, InstanceSource};
use crate::geometry::Point2;
use crate::preprocessing::{letterbox, Letterbox};
use crate::types::{Frame, ModelConfig};
use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat, Vector},
    imgproc,
    prelude::*,
};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

const MASK_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone)]
struct Candidate {
    bbox: [f32; 4],
    class_id: usize,
    confidence: f32,
    coeffs: Vec<f32>,
}

struct Prototypes {
    data: Vec<f32>,
    channels: usize,
    height: usize,
    width: usize,
}

pub struct YoloSegModel {
    session: Session,
    input_size: usize,
    num_mask_coeffs: usize,
    nms_iou: f32,
    mask_classes: HashSet<usize>,
    metadata_names: Option<BTreeMap<usize, String>>,
}

impl YoloSegModel {
    pub fn load(config: &ModelConfig) -> Result<Self> {
        info!("Loading segmentation model: {}", config.path);

        let mut builder = Session::builder()?;
        if config.use_cuda {
            info!("Enabling CUDA execution provider");
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build()])?;
        }

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.num_threads)?
            .commit_from_file(&config.path)
            .with_context(|| format!("Failed to load model {}", config.path))?;

        let metadata_names = names_from_metadata(&session);
        if metadata_names.is_none() {
            warn!("Model carries no class names metadata");
        }

        info!("✓ Segmentation model initialized");

        Ok(Self {
            session,
            input_size: config.input_size,
            num_mask_coeffs: config.num_mask_coeffs,
            nms_iou: config.nms_iou,
            mask_classes: HashSet::new(),
            metadata_names,
        })
    }

    /// Model metadata wins; the configured list is the fallback.
    pub fn class_names(&self, configured: &[String]) -> BTreeMap<usize, String> {
        match &self.metadata_names {
            Some(names) => names.clone(),
            None => names_from_list(configured),
        }
    }

    pub fn set_mask_classes(&mut self, ids: impl IntoIterator<Item = usize>) {
        self.mask_classes = ids.into_iter().collect();
    }

    fn run(&mut self, lb: &Letterbox) -> Result<(Vec<f32>, Vec<usize>, Prototypes)> {
        let shape = [1, 3, self.input_size, self.input_size];
        let input_value = ort::value::Value::from_array((
            shape.as_slice(),
            lb.input.clone().into_boxed_slice(),
        ))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        if outputs.len() < 2 {
            bail!("Expected 2 model outputs, got {}", outputs.len());
        }

        let (shape0, data0) = outputs[0].try_extract_tensor::<f32>()?;
        let box_shape: Vec<usize> = shape0.iter().map(|&d| d as usize).collect();
        let boxes = data0.to_vec();

        let (shape1, data1) = outputs[1].try_extract_tensor::<f32>()?;
        if shape1.len() != 4 {
            bail!("Unexpected prototype shape {:?}", shape1);
        }
        let protos = Prototypes {
            data: data1.to_vec(),
            channels: shape1[1] as usize,
            height: shape1[2] as usize,
            width: shape1[3] as usize,
        };

        Ok((boxes, box_shape, protos))
    }

    fn decode_candidates(
        &self,
        output: &[f32],
        shape: &[usize],
        lb: &Letterbox,
        frame_w: usize,
        frame_h: usize,
        conf_thresh: f32,
    ) -> Result<Vec<Candidate>> {
        if shape.len() != 3 {
            bail!("Unexpected box output shape {:?}", shape);
        }
        let channels = shape[1];
        let n = shape[2];
        if channels <= 4 + self.num_mask_coeffs {
            bail!(
                "Box output has {} channels, too few for {} mask coefficients",
                channels,
                self.num_mask_coeffs
            );
        }
        let num_classes = channels - 4 - self.num_mask_coeffs;

        let mut candidates = Vec::new();
        for i in 0..n {
            let mut best_conf = 0.0f32;
            let mut best_class = 0;
            for c in 0..num_classes {
                let conf = output[n * (4 + c) + i];
                if conf > best_conf {
                    best_conf = conf;
                    best_class = c;
                }
            }
            if best_conf < conf_thresh {
                continue;
            }

            let cx = output[i];
            let cy = output[n + i];
            let w = output[n * 2 + i];
            let h = output[n * 3 + i];

            let (x1, y1) = lb.unmap(cx - w / 2.0, cy - h / 2.0);
            let (x2, y2) = lb.unmap(cx + w / 2.0, cy + h / 2.0);

            let coeffs = (0..self.num_mask_coeffs)
                .map(|m| output[n * (4 + num_classes + m) + i])
                .collect();

            candidates.push(Candidate {
                bbox: [
                    x1.clamp(0.0, frame_w as f32),
                    y1.clamp(0.0, frame_h as f32),
                    x2.clamp(0.0, frame_w as f32),
                    y2.clamp(0.0, frame_h as f32),
                ],
                class_id: best_class,
                confidence: best_conf,
                coeffs,
            });
        }

        Ok(candidates)
    }

    fn polygon_for(
        &self,
        candidate: &Candidate,
        protos: &Prototypes,
        lb: &Letterbox,
    ) -> Result<Option<Vec<Point2>>> {
        if protos.channels != candidate.coeffs.len() {
            bail!(
                "Prototype channels {} != mask coefficients {}",
                protos.channels,
                candidate.coeffs.len()
            );
        }

        // Box in prototype space; pixels outside it are cleared.
        let ratio = protos.width as f32 / self.input_size as f32;
        let to_proto = |x: f32, y: f32| (x * lb.scale + lb.pad_x, y * lb.scale + lb.pad_y);
        let (px1, py1) = to_proto(candidate.bbox[0], candidate.bbox[1]);
        let (px2, py2) = to_proto(candidate.bbox[2], candidate.bbox[3]);
        let proto_box = [px1 * ratio, py1 * ratio, px2 * ratio, py2 * ratio];

        let mask = decode_mask(
            &protos.data,
            &candidate.coeffs,
            protos.width,
            protos.height,
            &proto_box,
        );

        let contour = match largest_contour(&mask, protos.width, protos.height)? {
            Some(c) => c,
            None => return Ok(None),
        };

        let points = contour
            .into_iter()
            .map(|(mx, my)| {
                let (x, y) = lb.unmap(mx as f32 / ratio, my as f32 / ratio);
                Point2::new(x, y)
            })
            .collect();
        Ok(Some(points))
    }
}

impl InstanceSource for YoloSegModel {
    fn infer(&mut self, frame: &Frame, confidence: f32) -> Result<Vec<Instance>> {
        let lb = letterbox(&frame.data, frame.width, frame.height, self.input_size)?;
        let (boxes, box_shape, protos) = self.run(&lb)?;
        let candidates = self.decode_candidates(
            &boxes,
            &box_shape,
            &lb,
            frame.width,
            frame.height,
            confidence,
        )?;
        let kept = nms_per_class(candidates, self.nms_iou);

        let mut instances = Vec::with_capacity(kept.len());
        for candidate in kept {
            let polygon = if self.mask_classes.contains(&candidate.class_id) {
                self.polygon_for(&candidate, &protos, &lb)?
            } else {
                None
            };
            instances.push(Instance {
                bbox: candidate.bbox,
                class_id: candidate.class_id,
                confidence: candidate.confidence,
                polygon,
            });
        }

        debug!("Model produced {} instances", instances.len());
        Ok(instances)
    }
}

fn names_from_metadata(session: &Session) -> Option<BTreeMap<usize, String>> {
    let metadata = session.metadata().ok()?;
    let raw = metadata.custom("names").ok()??;
    let names = parse_names_metadata(&raw);
    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

/// sigmoid(coeffs · protos) > 0.5 inside `proto_box`, as a 0/255 mask.
fn decode_mask(
    protos: &[f32],
    coeffs: &[f32],
    width: usize,
    height: usize,
    proto_box: &[f32; 4],
) -> Vec<u8> {
    let mut mask = vec![0u8; width * height];
    let plane = width * height;

    for y in 0..height {
        let yc = y as f32 + 0.5;
        if yc < proto_box[1] || yc > proto_box[3] {
            continue;
        }
        for x in 0..width {
            let xc = x as f32 + 0.5;
            if xc < proto_box[0] || xc > proto_box[2] {
                continue;
            }
            let mut sum = 0.0f32;
            for (c, coeff) in coeffs.iter().enumerate() {
                let idx = c * plane + y * width + x;
                if idx < protos.len() {
                    sum += coeff * protos[idx];
                }
            }
            let prob = 1.0 / (1.0 + (-sum).exp());
            if prob > MASK_THRESHOLD {
                mask[y * width + x] = 255;
            }
        }
    }

    mask
}

fn largest_contour(mask: &[u8], width: usize, height: usize) -> Result<Option<Vec<(i32, i32)>>> {
    if !mask.iter().any(|&v| v > 0) {
        return Ok(None);
    }

    let mat = Mat::from_slice(mask)?;
    let mat = mat.reshape(1, height as i32)?.try_clone()?;
    debug_assert_eq!(mat.cols() as usize, width);

    let mut contours = Vector::<Vector<core::Point>>::new();
    imgproc::find_contours(
        &mat,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        core::Point::new(0, 0),
    )?;

    let mut best: Option<(f64, Vector<core::Point>)> = None;
    for contour in contours.iter() {
        if contour.len() < 3 {
            continue;
        }
        let area = imgproc::contour_area(&contour, false)?;
        if best.as_ref().map_or(true, |(a, _)| area > *a) {
            best = Some((area, contour));
        }
    }

    Ok(best.map(|(_, contour)| contour.iter().map(|p| (p.x, p.y)).collect()))
}

fn nms_per_class(mut candidates: Vec<Candidate>, iou_thresh: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = keep.iter().any(|k| {
            k.class_id == candidate.class_id
                && super::tracker::iou(&k.bbox, &candidate.bbox) >= iou_thresh
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(bbox: [f32; 4], class_id: usize, confidence: f32) -> Candidate {
        Candidate {
            bbox,
            class_id,
            confidence,
            coeffs: Vec::new(),
        }
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping_same_class() {
        let kept = nms_per_class(
            vec![
                candidate([0.0, 0.0, 100.0, 100.0], 1, 0.6),
                candidate([5.0, 5.0, 105.0, 105.0], 1, 0.9),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn test_nms_is_class_aware() {
        // A car sitting on a road must not be suppressed by the road box.
        let kept = nms_per_class(
            vec![
                candidate([0.0, 0.0, 100.0, 100.0], 0, 0.9),
                candidate([0.0, 0.0, 100.0, 100.0], 1, 0.8),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_decode_mask_respects_box() {
        // One prototype channel that is strongly positive everywhere.
        let (w, h) = (8, 8);
        let protos = vec![10.0f32; w * h];
        let mask = decode_mask(&protos, &[1.0], w, h, &[2.0, 2.0, 6.0, 6.0]);
        assert_eq!(mask[0], 0);
        assert_eq!(mask[3 * w + 3], 255);
        assert_eq!(mask[7 * w + 7], 0);
        assert_eq!(mask.iter().filter(|&&v| v > 0).count(), 16);
    }

    #[test]
    fn test_decode_mask_negative_logits_empty() {
        let (w, h) = (4, 4);
        let protos = vec![-10.0f32; w * h];
        let mask = decode_mask(&protos, &[1.0], w, h, &[0.0, 0.0, 4.0, 4.0]);
        assert!(mask.iter().all(|&v| v == 0));
    }
}
