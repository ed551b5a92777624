use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::response::{BlobNode, NodeId, ObjectNode, ResponseGraph, ResponseNode};

/// `generateContent` response body. Fields this type does not name survive in the `extra`
/// maps and are carried into the graph as attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<Value>,
    #[serde(default)]
    pub usage_metadata: Option<Value>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, alias = "inline_data", skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, alias = "file_data", skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default, alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    #[serde(default, alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(default, alias = "file_uri")]
    pub file_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl GenerateContentResponse {
    /// Adapts the typed response into the closed graph shape the extractor walks.
    pub fn to_graph(&self) -> ResponseGraph {
        let mut graph = ResponseGraph::new();
        let candidates = self
            .candidates
            .iter()
            .map(|candidate| add_candidate(&mut graph, candidate))
            .collect();
        let candidates = graph.add(ResponseNode::Sequence(candidates));
        let mut root =
            ObjectNode::new("GenerateContentResponse").with_attribute("candidates", candidates);
        if let Some(version) = self.model_version.as_ref() {
            let id = graph.add(ResponseNode::Text(version.clone()));
            root = root.with_attribute("model_version", id);
        }
        let named = [
            ("prompt_feedback", self.prompt_feedback.as_ref()),
            ("usage_metadata", self.usage_metadata.as_ref()),
        ];
        for (key, value) in named {
            if let Some(value) = value {
                let id = graph.add_json(value);
                root = root.with_attribute(key, id);
            }
        }
        let root = add_extra(&mut graph, root, &self.extra);
        let root = graph.add(ResponseNode::Opaque(root));
        graph.set_root(root);
        graph
    }
}

fn add_candidate(graph: &mut ResponseGraph, candidate: &Candidate) -> NodeId {
    let mut object = ObjectNode::new("Candidate");
    if let Some(content) = candidate.content.as_ref() {
        let parts = content
            .parts
            .iter()
            .map(|part| add_part(graph, part))
            .collect();
        let parts = graph.add(ResponseNode::Sequence(parts));
        let mut node = ObjectNode::new("Content").with_attribute("parts", parts);
        if let Some(role) = content.role.as_ref() {
            let id = graph.add(ResponseNode::Text(role.clone()));
            node = node.with_attribute("role", id);
        }
        let node = add_extra(graph, node, &content.extra);
        let content = graph.add(ResponseNode::Opaque(node));
        object = object.with_attribute("content", content);
    }
    if let Some(reason) = candidate.finish_reason.as_ref() {
        let id = graph.add(ResponseNode::Text(reason.clone()));
        object = object.with_attribute("finish_reason", id);
    }
    let object = add_extra(graph, object, &candidate.extra);
    graph.add(ResponseNode::Opaque(object))
}

fn add_part(graph: &mut ResponseGraph, part: &Part) -> NodeId {
    let mut object = ObjectNode::new("Part");
    if let Some(text) = part.text.as_ref() {
        let id = graph.add(ResponseNode::Text(text.clone()));
        object = object.with_attribute("text", id);
    }
    if let Some(blob) = part.inline_data.as_ref() {
        let data = blob
            .data
            .as_ref()
            .map(|data| graph.add(ResponseNode::Text(data.clone())));
        let id = graph.add(ResponseNode::InlineData(BlobNode {
            mime_type: blob.mime_type.clone(),
            uri: None,
            data,
        }));
        object = object.with_attribute("inline_data", id);
    }
    if let Some(file) = part.file_data.as_ref() {
        let data = file
            .data
            .as_ref()
            .map(|data| graph.add(ResponseNode::Text(data.clone())));
        let id = graph.add(ResponseNode::FileData(BlobNode {
            mime_type: file.mime_type.clone(),
            uri: file.file_uri.clone(),
            data,
        }));
        object = object.with_attribute("file_data", id);
    }
    let object = add_extra(graph, object, &part.extra);
    graph.add(ResponseNode::Opaque(object))
}

fn add_extra(
    graph: &mut ResponseGraph,
    mut object: ObjectNode,
    extra: &Map<String, Value>,
) -> ObjectNode {
    for (key, value) in extra {
        let id = graph.add_json(value);
        object = object.with_attribute(key.clone(), id);
    }
    object
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::decode::encode_base64;
    use crate::extract::{collect_image_bytes, collect_text_parts};

    use super::GenerateContentResponse;

    #[test]
    fn typed_response_adapts_to_graph_with_image_and_text() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "A caption"},
                        {"inlineData": {"mimeType": "image/png", "data": encode_base64(b"\x89PNG-bytes")}}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"totalTokenCount": 1290},
            "modelVersion": "gemini-2.5-flash-image"
        });
        let response: GenerateContentResponse = serde_json::from_value(payload)?;
        assert_eq!(response.candidates.len(), 1);
        let graph = response.to_graph();
        assert_eq!(collect_image_bytes(&graph), Some(b"\x89PNG-bytes".to_vec()));
        assert_eq!(collect_text_parts(&graph), vec!["A caption".to_string()]);
        Ok(())
    }

    #[test]
    fn unknown_part_fields_remain_reachable() -> anyhow::Result<()> {
        let long = encode_base64(&[42u8; 90]);
        let payload = json!({
            "candidates": [{"content": {"parts": [{"media": {"payload": long}}]}}]
        });
        let response: GenerateContentResponse = serde_json::from_value(payload)?;
        assert_eq!(collect_image_bytes(&response.to_graph()), Some(vec![42u8; 90]));
        Ok(())
    }

    #[test]
    fn unknown_candidate_and_content_fields_remain_reachable() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [{"text": "hi"}]},
                "image": {"inline_data": {"data": "Y2FuZGltZw=="}}
            }]
        });
        let response: GenerateContentResponse = serde_json::from_value(payload)?;
        assert!(response.candidates[0].extra.contains_key("image"));
        assert_eq!(collect_image_bytes(&response.to_graph()), Some(b"candimg".to_vec()));

        let payload = json!({
            "candidates": [{"content": {"parts": [], "media": {"data": "Y29udGVudA=="}}}]
        });
        let response: GenerateContentResponse = serde_json::from_value(payload)?;
        assert_eq!(collect_image_bytes(&response.to_graph()), Some(b"content".to_vec()));

        let payload = json!({"images": [{"inlineData": {"data": "cm9vdA=="}}]});
        let response: GenerateContentResponse = serde_json::from_value(payload)?;
        assert_eq!(collect_image_bytes(&response.to_graph()), Some(b"root".to_vec()));
        Ok(())
    }

    #[test]
    fn snake_case_inline_data_is_accepted() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{"content": {"parts": [
                {"inline_data": {"mime_type": "image/jpeg", "data": encode_base64(b"jpeg")}}
            ]}}]
        });
        let response: GenerateContentResponse = serde_json::from_value(payload)?;
        let part = &response.candidates[0].content.as_ref().unwrap().parts[0];
        assert_eq!(
            part.inline_data.as_ref().and_then(|blob| blob.mime_type.as_deref()),
            Some("image/jpeg")
        );
        assert_eq!(collect_image_bytes(&response.to_graph()), Some(b"jpeg".to_vec()));
        Ok(())
    }
}
