mod device_view;
mod metric_view;
mod painter;
mod record_view;
mod sync_progress;
mod table;

pub(crate) use self::device_view::DeviceListView;
pub(crate) use self::metric_view::{RenderValue, SeriesView, SnapshotView, StepsView};
pub(crate) use self::painter::Painter;
pub(crate) use self::record_view::RecordView;
pub(crate) use self::sync_progress::SyncProgress;
