// THEORY:
// The `stream_pipeline` module is the async front door of the stacker, for
// callers whose features arrive from an async reader (a database cursor, a
// network response, a file being streamed in).
//
// It runs exactly the same single pass as the synchronous pipeline. Features
// are pulled one at a time from a `futures::Stream` and absorbed in arrival
// order. There is no fan-out to workers: the incremental position strategies
// are order sensitive and do not merge, so one task owns the cluster map for
// the whole pass. The stream is dropped (released) when the pass ends.

use crate::core_modules::cluster::MemberRules;
use crate::core_modules::cluster_pass::cluster_pass::{ClusterKeying, ClusterSet};
use crate::core_modules::feature::Feature;
use crate::core_modules::mapping::{CoordinateMapping, Crs};
use crate::core_modules::position::PositionStrategy;
use crate::core_modules::projector::StackedCollection;
use crate::error::StackResult;
use crate::pipeline::{OutputWindow, PointStacker, RunKeying};
use futures::{Stream, StreamExt, pin_mut};
use tracing::info;

impl PointStacker {
    /// Stacks every feature yielded by `features`. Equivalent to `execute`.
    pub async fn execute_stream<St>(
        &self,
        features: St,
        source_crs: &Crs,
        window: &OutputWindow,
    ) -> StackResult<StackedCollection>
    where
        St: Stream<Item = StackResult<Feature>>,
    {
        let (mapping, keying) = self.prepare(source_crs, window)?;
        let rules = self.member_rules();
        let strategy = self.config().position;
        let mapping = mapping.as_ref();
        pin_mut!(features);
        match keying {
            RunKeying::Grid(keying) => {
                let set = drain(features, &keying, strategy, mapping, &rules).await?;
                self.finish(set.clusters(), mapping)
            }
            RunKeying::Attribute(keying) => {
                let set = drain(features, &keying, strategy, mapping, &rules).await?;
                self.finish(set.clusters(), mapping)
            }
        }
    }
}

async fn drain<St, C>(
    mut features: St,
    keying: &C,
    strategy: PositionStrategy,
    mapping: &dyn CoordinateMapping,
    rules: &MemberRules<'_>,
) -> StackResult<ClusterSet<C::Key>>
where
    St: Stream<Item = StackResult<Feature>> + Unpin,
    C: ClusterKeying,
{
    let mut set = ClusterSet::new(strategy);
    while let Some(feature) = features.next().await {
        set.absorb(feature?, keying, mapping, rules)?;
    }
    info!(
        clusters = set.len(),
        consumed = set.consumed(),
        skipped = set.skipped(),
        "stream clustering pass complete"
    );
    Ok(set)
}
