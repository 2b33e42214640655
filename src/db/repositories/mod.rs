mod detections;
mod registry;
