//! Timed intent scripts for headless clients and tests

use crate::game::intent::{ButtonLatch, InputIntent, IntentSource};

/// Button and axis levels held for a stretch of ticks
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeldLevels {
    pub horizontal: f32,
    pub vertical: f32,
    pub sprint: bool,
    pub jump: bool,
    pub dive: bool,
    pub throw: bool,
    pub hand_left: bool,
    pub hand_right: bool,
    pub catch: bool,
}

impl HeldLevels {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn forward() -> Self {
        Self {
            vertical: 1.0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptStep {
    pub ticks: u64,
    pub levels: HeldLevels,
}

impl ScriptStep {
    pub fn new(ticks: u64, levels: HeldLevels) -> Self {
        Self { ticks, levels }
    }
}

/// Replays [`ScriptStep`]s by tick, deriving edges through [`ButtonLatch`]es.
/// Past the end the script idles, or starts over when looping.
#[derive(Debug, Clone)]
pub struct ScriptedIntents {
    steps: Vec<ScriptStep>,
    total: u64,
    looping: bool,
    jump: ButtonLatch,
    dive: ButtonLatch,
    throw: ButtonLatch,
}

impl ScriptedIntents {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        let total = steps.iter().map(|s| s.ticks).sum();
        Self {
            steps,
            total,
            looping: false,
            jump: ButtonLatch::default(),
            dive: ButtonLatch::default(),
            throw: ButtonLatch::default(),
        }
    }

    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Default bot routine: catch, jog, charge a throw, dive
    pub fn warmup() -> Self {
        Self::new(vec![
            ScriptStep::new(
                25,
                HeldLevels {
                    catch: true,
                    ..HeldLevels::idle()
                },
            ),
            ScriptStep::new(50, HeldLevels::forward()),
            ScriptStep::new(
                30,
                HeldLevels {
                    throw: true,
                    hand_left: true,
                    ..HeldLevels::idle()
                },
            ),
            ScriptStep::new(10, HeldLevels::idle()),
            ScriptStep::new(
                50,
                HeldLevels {
                    sprint: true,
                    ..HeldLevels::forward()
                },
            ),
            ScriptStep::new(
                5,
                HeldLevels {
                    dive: true,
                    ..HeldLevels::forward()
                },
            ),
            ScriptStep::new(40, HeldLevels::idle()),
            ScriptStep::new(
                5,
                HeldLevels {
                    jump: true,
                    ..HeldLevels::idle()
                },
            ),
        ])
    }

    pub fn len_ticks(&self) -> u64 {
        self.total
    }

    /// Levels scheduled for a zero-based tick
    pub fn levels_at(&self, tick: u64) -> HeldLevels {
        if self.total == 0 {
            return HeldLevels::idle();
        }
        let mut at = if self.looping {
            tick % self.total
        } else if tick >= self.total {
            return HeldLevels::idle();
        } else {
            tick
        };
        for step in &self.steps {
            if at < step.ticks {
                return step.levels;
            }
            at -= step.ticks;
        }
        HeldLevels::idle()
    }
}

impl IntentSource for ScriptedIntents {
    fn sample(&mut self, tick: u64) -> InputIntent {
        let levels = self.levels_at(tick);
        InputIntent {
            horizontal: levels.horizontal,
            vertical: levels.vertical,
            sprint_held: levels.sprint,
            jump: self.jump.sample(levels.jump).down,
            dive: self.dive.sample(levels.dive),
            throw: self.throw.sample(levels.throw),
            hand_left: levels.hand_left,
            hand_right: levels.hand_right,
            catch_held: levels.catch,
        }
    }
}
