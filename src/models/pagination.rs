//! 分页相关的数据结构

use serde::Serialize;
use utoipa::ToSchema;

const DEFAULT_PER_PAGE: u64 = 20;
const MAX_PER_PAGE: u64 = 100;
/// offset 需要能放进数据库的 BIGINT
const MAX_PAGE: u64 = i64::MAX as u64 / MAX_PER_PAGE;

#[derive(Debug, Clone, Copy, Default)]
pub struct PaginationParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl PaginationParams {
    pub fn new(page: Option<u64>, per_page: Option<u64>) -> Self {
        Self { page, per_page }
    }

    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).clamp(1, MAX_PAGE)
    }

    pub fn per_page(&self) -> u64 {
        self.per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> u64 {
        (self.page() - 1).saturating_mul(self.per_page())
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, params: &PaginationParams, total: u64) -> Self {
        let per_page = params.per_page();
        let total_pages = if total == 0 {
            1
        } else {
            total.div_ceil(per_page)
        };
        Self {
            data,
            page: params.page(),
            per_page,
            total,
            total_pages,
        }
    }
}
