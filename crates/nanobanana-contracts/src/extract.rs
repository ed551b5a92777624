use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;

use crate::decode::decode;
use crate::response::{BlobNode, NodeId, ObjectNode, ResponseGraph, ResponseNode};

/// Strings at or below this length are never read as embedded images.
pub const MIN_EMBEDDED_TEXT_CHARS: usize = 80;

const INLINE_DATA_KEYS: [&str; 2] = ["inline_data", "inlineData"];
const FILE_DATA_KEYS: [&str; 2] = ["file_data", "fileData"];
const PAYLOAD_KEYS: [&str; 3] = ["data", "image", "blob"];

/// Attributes followed on typed objects, in visiting order.
pub const CANDIDATE_ATTRIBUTES: [&str; 10] = [
    "candidates",
    "content",
    "parts",
    "generated_content",
    "contents",
    "responses",
    "messages",
    "media",
    "image",
    "images",
];

/// Breadth-first search for the first embedded image in `graph`.
///
/// Returns the first payload met in traversal order, not the largest or the last one.
/// Composite nodes are visited at most once, so cyclic graphs terminate.
pub fn collect_image_bytes(graph: &ResponseGraph) -> Option<Vec<u8>> {
    let mut queue = VecDeque::new();
    queue.extend(graph.root());
    let mut visited = HashSet::new();

    while let Some(id) = queue.pop_front() {
        let Some(node) = graph.node(id) else {
            continue;
        };
        match node {
            ResponseNode::Leaf => {}
            ResponseNode::Bytes(bytes) => {
                if !bytes.is_empty() {
                    return Some(bytes.clone());
                }
            }
            ResponseNode::Text(text) => {
                if let Some(bytes) = embedded_text_image(text) {
                    return Some(bytes);
                }
            }
            composite => {
                if !visited.insert(id) {
                    continue;
                }
                if let Some(bytes) = visit_composite(graph, composite, &mut queue) {
                    return Some(bytes);
                }
            }
        }
    }
    None
}

fn visit_composite(
    graph: &ResponseGraph,
    node: &ResponseNode,
    queue: &mut VecDeque<NodeId>,
) -> Option<Vec<u8>> {
    match node {
        ResponseNode::Mapping(entries) => {
            if let Some(bytes) = wrapped_payload(graph, entries) {
                return Some(bytes);
            }
            for (key, value) in entries {
                if PAYLOAD_KEYS.contains(&key.as_str()) {
                    if let Some(bytes) = non_empty(decode(graph.node(*value))) {
                        return Some(bytes);
                    }
                }
                queue.push_back(*value);
            }
            None
        }
        ResponseNode::Opaque(object) => visit_object(graph, object, queue),
        ResponseNode::Sequence(items) => {
            queue.extend(items.iter().copied());
            None
        }
        ResponseNode::InlineData(blob) | ResponseNode::FileData(blob) => {
            visit_blob(graph, blob, queue)
        }
        ResponseNode::Leaf | ResponseNode::Bytes(_) | ResponseNode::Text(_) => None,
    }
}

fn visit_object(
    graph: &ResponseGraph,
    object: &ObjectNode,
    queue: &mut VecDeque<NodeId>,
) -> Option<Vec<u8>> {
    if let Some(bytes) = wrapped_payload(graph, &object.attributes) {
        return Some(bytes);
    }
    for name in CANDIDATE_ATTRIBUTES {
        if let Some(value) = object.attributes.get(name) {
            if graph.node(*value) != Some(&ResponseNode::Leaf) {
                queue.push_back(*value);
            }
        }
    }
    if let Some(items) = object.items.as_ref() {
        queue.extend(items.iter().copied());
    }
    None
}

fn visit_blob(
    graph: &ResponseGraph,
    blob: &BlobNode,
    queue: &mut VecDeque<NodeId>,
) -> Option<Vec<u8>> {
    let data = blob.data?;
    if let Some(bytes) = non_empty(decode(graph.node(data))) {
        return Some(bytes);
    }
    queue.push_back(data);
    None
}

/// Inline data first, then file data; both carry the payload in a nested `data` field.
fn wrapped_payload(graph: &ResponseGraph, fields: &IndexMap<String, NodeId>) -> Option<Vec<u8>> {
    for keys in [INLINE_DATA_KEYS, FILE_DATA_KEYS] {
        let wrapper = keys.iter().find_map(|key| fields.get(*key).copied());
        if let Some(bytes) = wrapper.and_then(|id| nested_data(graph, id)) {
            return Some(bytes);
        }
    }
    None
}

/// Decodes the `data` field of a payload wrapper.
fn nested_data(graph: &ResponseGraph, wrapper: NodeId) -> Option<Vec<u8>> {
    let data = graph.field(wrapper, "data")?;
    non_empty(decode(graph.node(data)))
}

fn embedded_text_image(text: &str) -> Option<Vec<u8>> {
    let candidate = text.trim();
    if candidate.chars().count() <= MIN_EMBEDDED_TEXT_CHARS {
        return None;
    }
    if !candidate.chars().all(is_base64_char) {
        return None;
    }
    non_empty(decode(Some(&ResponseNode::Text(candidate.to_string()))))
}

fn is_base64_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '+' | '/' | '=' | '\n' | '\r')
}

fn non_empty(bytes: Option<Vec<u8>>) -> Option<Vec<u8>> {
    bytes.filter(|value| !value.is_empty())
}

/// Every non-empty `text` of `candidates[*].content.parts[*]`, in encounter order.
pub fn collect_text_parts(graph: &ResponseGraph) -> Vec<String> {
    let mut texts = Vec::new();
    let Some(root) = graph.root() else {
        return texts;
    };
    let Some(candidates) = graph.field(root, "candidates") else {
        return texts;
    };
    for candidate in graph.items(candidates) {
        let parts = graph
            .field(*candidate, "content")
            .and_then(|content| graph.field(content, "parts"));
        let Some(parts) = parts else {
            continue;
        };
        for part in graph.items(parts) {
            if let Some(text) = graph
                .field(*part, "text")
                .and_then(|id| graph.text(id))
                .filter(|text| !text.is_empty())
            {
                texts.push(text.to_string());
            }
        }
    }
    texts
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use serde_json::json;

    use crate::decode::encode_base64;
    use crate::response::{BlobNode, ObjectNode, ResponseGraph, ResponseNode};

    use super::{collect_image_bytes, collect_text_parts};

    fn png_like(len: usize) -> Vec<u8> {
        (0..len).map(|idx| (idx * 7 % 251) as u8).collect()
    }

    #[test]
    fn finds_inline_data_nested_among_unrelated_siblings() {
        let image = png_like(96);
        let graph = ResponseGraph::from_json(&json!({
            "model_version": "gemini-2.5-flash-image",
            "usage": {"tokens": 12, "note": "short"},
            "outer": {
                "label": "first",
                "middle": {
                    "flags": [true, false],
                    "inner": {
                        "inline_data": {"mime_type": "image/png", "data": encode_base64(&image)},
                        "caption": "sibling"
                    }
                }
            }
        }));
        assert_eq!(collect_image_bytes(&graph), Some(image));
    }

    #[test]
    fn camel_case_inline_data_from_rest_payload_is_found() {
        let image = png_like(40);
        let graph = ResponseGraph::from_json(&json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Here you go"},
                        {"inlineData": {"mimeType": "image/png", "data": encode_base64(&image)}}
                    ]
                },
                "finishReason": "STOP"
            }]
        }));
        assert_eq!(collect_image_bytes(&graph), Some(image));
        assert_eq!(collect_text_parts(&graph), vec!["Here you go".to_string()]);
    }

    #[test]
    fn cyclic_graph_without_image_terminates() {
        let mut graph = ResponseGraph::new();
        let note = graph.add(ResponseNode::Text("not an image".to_string()));
        let parent = graph.add(ResponseNode::Mapping(IndexMap::new()));
        let child = graph.add(ResponseNode::Mapping(IndexMap::from([
            ("parent".to_string(), parent),
            ("note".to_string(), note),
        ])));
        if let Some(ResponseNode::Mapping(entries)) = graph.node_mut(parent) {
            entries.insert("child".to_string(), child);
            entries.insert("self".to_string(), parent);
        }
        graph.set_root(parent);
        assert_eq!(collect_image_bytes(&graph), None);
    }

    #[test]
    fn cyclic_graph_still_yields_image_behind_the_cycle() {
        let mut graph = ResponseGraph::new();
        let bytes = graph.add(ResponseNode::Bytes(vec![9, 8, 7]));
        let root = graph.add(ResponseNode::Sequence(Vec::new()));
        let loop_back = graph.add(ResponseNode::Sequence(vec![root, bytes]));
        if let Some(ResponseNode::Sequence(items)) = graph.node_mut(root) {
            items.push(loop_back);
            items.push(root);
        }
        graph.set_root(root);
        assert_eq!(collect_image_bytes(&graph), Some(vec![9, 8, 7]));
    }

    #[test]
    fn short_base64_strings_are_never_images() {
        let fifty = "QUJD".repeat(12) + "QQ";
        assert_eq!(fifty.len(), 50);
        let graph = ResponseGraph::from_json(&json!({"payload": fifty, "list": [fifty]}));
        assert_eq!(collect_image_bytes(&graph), None);
    }

    #[test]
    fn long_bare_base64_string_is_decoded() {
        let image = png_like(120);
        let graph = ResponseGraph::from_json(&json!({"payload": encode_base64(&image)}));
        assert_eq!(collect_image_bytes(&graph), Some(image));
    }

    #[test]
    fn long_text_outside_alphabet_is_a_dead_end() {
        let prose = "This is a long caption with spaces, commas and punctuation! ".repeat(3);
        let graph = ResponseGraph::from_json(&json!({"text": prose}));
        assert_eq!(collect_image_bytes(&graph), None);
    }

    #[test]
    fn payload_alias_keys_decode_short_values_directly() {
        let graph = ResponseGraph::from_json(&json!({"blob": "QUJD"}));
        assert_eq!(collect_image_bytes(&graph), Some(b"ABC".to_vec()));
    }

    #[test]
    fn first_payload_in_traversal_order_wins() {
        let shallow = png_like(90);
        let deep = png_like(30);
        let graph = ResponseGraph::from_json(&json!({
            "nested": {"inline_data": {"data": encode_base64(&deep)}},
            "image": encode_base64(&shallow)
        }));
        assert_eq!(collect_image_bytes(&graph), Some(shallow));
    }

    #[test]
    fn typed_objects_follow_candidate_attributes_only() {
        let mut graph = ResponseGraph::new();
        let hidden = graph.add(ResponseNode::Bytes(vec![1]));
        let data = graph.add(ResponseNode::Text(encode_base64(b"png!")));
        let blob = graph.add(ResponseNode::InlineData(BlobNode {
            mime_type: Some("image/png".to_string()),
            uri: None,
            data: Some(data),
        }));
        let part = graph.add(ResponseNode::Opaque(
            ObjectNode::new("Part").with_attribute("inline_data", blob),
        ));
        let parts = graph.add(ResponseNode::Sequence(vec![part]));
        let content =
            graph.add(ResponseNode::Opaque(ObjectNode::new("Content").with_attribute("parts", parts)));
        let root = graph.add(ResponseNode::Opaque(
            ObjectNode::new("Response")
                .with_attribute("debug_blob", hidden)
                .with_attribute("content", content),
        ));
        graph.set_root(root);
        assert_eq!(collect_image_bytes(&graph), Some(b"png!".to_vec()));
    }

    #[test]
    fn file_data_wrapper_is_checked_after_inline_data() {
        let graph = ResponseGraph::from_json(&json!({
            "inline_data": {"data": ""},
            "file_data": {"file_uri": "gs://bucket/x.png", "data": encode_base64(b"file")}
        }));
        assert_eq!(collect_image_bytes(&graph), Some(b"file".to_vec()));
    }

    #[test]
    fn empty_bytes_are_skipped() {
        let mut graph = ResponseGraph::new();
        let empty = graph.add(ResponseNode::Bytes(Vec::new()));
        let full = graph.add(ResponseNode::Bytes(vec![5]));
        let root = graph.add(ResponseNode::Sequence(vec![empty, full]));
        graph.set_root(root);
        assert_eq!(collect_image_bytes(&graph), Some(vec![5]));
    }

    #[test]
    fn empty_graph_has_no_image_or_text() {
        let graph = ResponseGraph::new();
        assert_eq!(collect_image_bytes(&graph), None);
        assert!(collect_text_parts(&graph).is_empty());
    }

    #[test]
    fn text_parts_are_collected_across_candidates_without_dedup() {
        let graph = ResponseGraph::from_json(&json!({
            "candidates": [
                {"content": {"parts": [{"text": "one"}, {"text": ""}, {"text": "two"}]}},
                {"content": {"parts": [{"text": "one"}]}},
                {"finishReason": "SAFETY"}
            ]
        }));
        assert_eq!(
            collect_text_parts(&graph),
            vec!["one".to_string(), "two".to_string(), "one".to_string()]
        );
    }
}
