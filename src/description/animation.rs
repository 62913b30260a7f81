//! 化身动画定义（仅数据，播放由外部动画系统负责）

/// 化身动画定义
#[derive(Clone, Debug)]
pub struct AnimationDefinition {
    /// 标识符，通常是 UUID
    pub id: String,
    /// 人类可读名称，非必填
    pub name: String,
    /// 网格/骨架中的实际动画名称
    pub animation_name: String,
    /// 是否循环播放
    pub looped: bool,
    /// 排他；播放时停止其他动画
    pub exclusive: bool,
    /// 速度是否随移动速度缩放
    pub use_velocity: bool,
    /// 每次开始播放时是否从头播放
    pub always_restart: bool,
    /// 淡入时长（秒）
    pub fadein: f32,
    /// 淡出时长（秒）
    pub fadeout: f32,
    /// 速度系数（1.0 为原速）
    pub speedfactor: f32,
    /// 权重系数（1.0 为全量）
    pub weightfactor: f32,
}

impl Default for AnimationDefinition {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            animation_name: String::new(),
            looped: true,
            exclusive: false,
            use_velocity: false,
            always_restart: false,
            fadein: 0.0,
            fadeout: 0.0,
            speedfactor: 1.0,
            weightfactor: 1.0,
        }
    }
}

/// 按人类可读名称查找动画定义
pub fn animation_by_name<'a>(
    animations: &'a [AnimationDefinition],
    name: &str,
) -> Option<&'a AnimationDefinition> {
    animations.iter().find(|a| a.name == name)
}
