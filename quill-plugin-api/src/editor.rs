//! Frequently used editing-engine message codes for [`EditorInterface::send`].
//!
//! [`EditorInterface::send`]: crate::abi::EditorInterface::send

use std::ffi::c_uint;

// Text retrieval and modification
pub const GET_TEXT: c_uint = 2182;
pub const SET_TEXT: c_uint = 2181;
pub const GET_LENGTH: c_uint = 2006;
pub const GET_SEL_TEXT: c_uint = 2161;
pub const REPLACE_SEL: c_uint = 2170;
pub const APPEND_TEXT: c_uint = 2282;

// Selection and cursor
pub const GET_SELECTION_START: c_uint = 2143;
pub const GET_SELECTION_END: c_uint = 2145;
pub const SET_SELECTION_START: c_uint = 2142;
pub const SET_SELECTION_END: c_uint = 2144;
pub const GET_CURRENT_POS: c_uint = 2008;
pub const SET_CURRENT_POS: c_uint = 2141;

// Modification state
pub const GET_MODIFY: c_uint = 2159;
pub const SET_SAVE_POINT: c_uint = 2014;

// Undo/redo
pub const UNDO: c_uint = 2176;
pub const REDO: c_uint = 2011;
pub const CAN_UNDO: c_uint = 2174;
pub const CAN_REDO: c_uint = 2016;
pub const EMPTY_UNDO_BUFFER: c_uint = 2175;

// Lines
pub const GET_LINE_COUNT: c_uint = 2154;
pub const LINE_FROM_POSITION: c_uint = 2166;
pub const POSITION_FROM_LINE: c_uint = 2167;
pub const GET_LINE: c_uint = 2153;
pub const GET_LINE_END_POSITION: c_uint = 2136;

// Search
pub const SEARCH_NEXT: c_uint = 2367;
pub const SEARCH_PREV: c_uint = 2368;
pub const FIND_TEXT: c_uint = 2150;
pub const REPLACE_TARGET: c_uint = 2194;
