use serde::Serialize;

/// 事件生命周期状态
///
/// 只会向前推进：`Pending → Dispatched → Running → 终态`。
/// 终态包括正常结束的 `Completed`/`Failed`，以及停止总线时产生的
/// `Cancelled`（排队中被清空）与 `ForceStopped`（超时后被强制结束）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Dispatched,
    Running,
    Completed,
    Failed,
    Cancelled,
    ForceStopped,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::ForceStopped
        )
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Dispatched => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed | Self::Cancelled | Self::ForceStopped => 3,
        }
    }

    /// 是否允许从 `self` 迁移到 `next`
    pub(crate) fn can_advance_to(self, next: EventStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}
