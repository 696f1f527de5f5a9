/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gumdrop, a multi-protocol internet server.
 *
 * Gumdrop is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gumdrop is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gumdrop.  If not, see <http://www.gnu.org/licenses/>.
 */

//! HTTP serving: the 1.1 codec, the 2 framing layer with HPACK, and the
//! request/response contract both feed into.

pub mod h1;
pub mod h2;
pub mod handler;
mod headers;
pub mod hpack;
mod request;
mod response;

pub use handler::{
    NotFoundFactory, NotFoundHandler, RequestHandler, RequestHandlerFactory, ResponseState,
};
pub use headers::Headers;
pub use request::{Request, Version};
pub use response::{http_date, reason_phrase, Response, SERVER_TOKEN};
