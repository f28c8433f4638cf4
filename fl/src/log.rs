// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

macro_rules! controller_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_CONTROLLER,
            "unit" => UNIT_CONTROLLER,
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_CONTROLLER,
            "unit" => UNIT_CONTROLLER,
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_CONTROLLER,
            "unit" => UNIT_CONTROLLER,
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_CONTROLLER,
            "unit" => UNIT_CONTROLLER,
        )
    };
}

macro_rules! learning_log {
    ($self:expr, $level:ident, $dpid:expr, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_LEARNING,
            "unit" => UNIT_LEARNING,
            "switch" => format!("{}", $dpid),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $dpid:expr, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_LEARNING,
            "unit" => UNIT_LEARNING,
            "switch" => format!("{}", $dpid),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $dpid:expr, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_LEARNING,
            "unit" => UNIT_LEARNING,
            "switch" => format!("{}", $dpid),
        )
    };
    ($self:expr, $level:ident, $dpid:expr, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_LEARNING,
            "unit" => UNIT_LEARNING,
            "switch" => format!("{}", $dpid),
        )
    };
}

macro_rules! session_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "phase" => format!("{}", $self.phase),
            "src" => $self.src_id.as_str(),
            "dst" => $self.dst_id.as_str(),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "phase" => format!("{}", $self.phase),
            "src" => $self.src_id.as_str(),
            "dst" => $self.dst_id.as_str(),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "phase" => format!("{}", $self.phase),
            "src" => $self.src_id.as_str(),
            "dst" => $self.dst_id.as_str(),
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "phase" => format!("{}", $self.phase),
            "src" => $self.src_id.as_str(),
            "dst" => $self.dst_id.as_str(),
        )
    };
}

macro_rules! clock_log {
    ($log:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($log,
            $msg;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_CLOCK,
            $($key => $value),*
        )
    };
    ($log:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_FL,
            "module" => crate::MOD_CLOCK,
            $($key => $value),*
        )
    };
}

pub(crate) use {clock_log, controller_log, learning_log, session_log};
