use crate::structure::LaneStructure;
use serde_json::json;

thread_local!(
    static DEBUG_FRAME: std::cell::RefCell<Vec<serde_json::Value>> = Default::default();
);

/// Logs the records of a lane structure to the current debug frame.
pub fn debug_structure(name: &str, structure: &LaneStructure) {
    let records: Vec<_> = structure
        .records()
        .map(|record| {
            json!({
                "id": record.id(),
                "lane": record.lane(),
                "relative_lane": record.relative_lane().rank(),
                "start": record.start_distance(),
                "length": record.length(),
                "cut_off_start": record.cut_off_start(),
                "cut_off_end": record.cut_off_end(),
                "left": record.left(),
                "right": record.right(),
                "next": record.next(),
                "prev": record.prev(),
            })
        })
        .collect();
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "structure",
            "name": name,
            "root": structure.root_record().map(|r| r.id()),
            "records": records,
        }))
    })
}

/// Takes everything logged since the last call.
pub fn take_debug_frame() -> serde_json::Value {
    json!(DEBUG_FRAME.with(|frame| frame.take()))
}
