#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SegmentType {
    HnswDistributed,
    BlockfileMetadata,
    BlockfileRecord,
}

impl SegmentType {
    /// The URN this segment type is addressed by on the wire.
    pub fn as_urn(&self) -> &'static str {
        match self {
            SegmentType::HnswDistributed => "urn:chroma:segment/vector/hnsw-distributed",
            SegmentType::BlockfileMetadata => "urn:chroma:segment/metadata/blockfile",
            SegmentType::BlockfileRecord => "urn:chroma:segment/record/blockfile",
        }
    }
}

impl std::fmt::Display for SegmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_urn())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SegmentScope {
    Vector,
    Metadata,
    Record,
}

impl std::fmt::Display for SegmentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SegmentScope::Vector => "VECTOR",
            SegmentScope::Metadata => "METADATA",
            SegmentScope::Record => "RECORD",
        };
        write!(f, "{s}")
    }
}

/// The three fixed segment (type, scope) triples minted for every new output
/// collection, per the attached-function `FinishCreate` protocol.
pub fn output_collection_segment_kinds() -> [(SegmentType, SegmentScope); 3] {
    [
        (SegmentType::HnswDistributed, SegmentScope::Vector),
        (SegmentType::BlockfileMetadata, SegmentScope::Metadata),
        (SegmentType::BlockfileRecord, SegmentScope::Record),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_collection_segment_kinds_are_fixed() {
        let kinds = output_collection_segment_kinds();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[0].0.as_urn(), "urn:chroma:segment/vector/hnsw-distributed");
        assert_eq!(kinds[1].1.to_string(), "METADATA");
    }
}
