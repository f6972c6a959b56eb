use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;

/// COCO class names (80 classes), the label set of the pretrained YOLOv8 weights.
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

const MAX_CLASSES: usize = 100_000;

static NAME_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\d+)\s*:\s*(?:'([^']*)'|"([^"]*)")"#).expect("valid names regex")
});

static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid int regex"));

/// Class id to name lookup. Ids without a name render as `class<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNames(Vec<String>);

impl ClassNames {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn coco() -> Self {
        Self(COCO_CLASSES.iter().map(|s| s.to_string()).collect())
    }

    pub fn get(&self, id: usize) -> String {
        self.0
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("class{id}"))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl Default for ClassNames {
    fn default() -> Self {
        Self::coco()
    }
}

/// Loads a labels file with one class name per line. Line 1 is class 0.
pub fn load_class_mapping(file_path: impl AsRef<Path>) -> Result<ClassNames> {
    let file = File::open(file_path.as_ref())?;
    let reader = BufReader::new(file);

    let names = reader
        .lines()
        .map(|line| line.map(|name| name.trim().to_string()))
        .collect::<std::io::Result<Vec<_>>>()?;

    // trailing blank lines are not classes
    let len = names.iter().rposition(|n| !n.is_empty()).map_or(0, |i| i + 1);
    Ok(ClassNames::new(names.into_iter().take(len).collect()))
}

/// Parses the `names` metadata entry written by the ultralytics exporter,
/// a python dict literal such as `{0: 'person', 1: 'bicycle'}`.
pub fn parse_metadata_names(raw: &str) -> Option<ClassNames> {
    let mut entries: Vec<(usize, String)> = NAME_ENTRY
        .captures_iter(raw)
        .filter_map(|cap| {
            let id = cap.get(1)?.as_str().parse().ok()?;
            let name = cap.get(2).or_else(|| cap.get(3))?.as_str().to_string();
            Some((id, name))
        })
        .collect();
    if entries.is_empty() {
        return None;
    }
    entries.sort_by_key(|(id, _)| *id);

    let size = entries.last().map_or(0, |(id, _)| id + 1);
    if size > MAX_CLASSES {
        return None;
    }
    let mut names: Vec<String> = (0..size).map(|id| format!("class{id}")).collect();
    for (id, name) in entries {
        names[id] = name;
    }
    Some(ClassNames::new(names))
}

/// Parses the `imgsz` metadata entry (`[640, 640]`) into (height, width).
pub fn parse_metadata_imgsz(raw: &str) -> Option<(u32, u32)> {
    let dims: Vec<u32> = INTEGER
        .find_iter(raw)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    match dims.as_slice() {
        [side] => Some((*side, *side)),
        [h, w, ..] => Some((*h, *w)),
        _ => None,
    }
}
