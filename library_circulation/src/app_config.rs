use paperclip::actix::web;

use crate::handlers;

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(
            web::scope("/api")
                .service(web::resource("/search").route(web::post().to(handlers::search)))
                .service(web::resource("/items").route(web::get().to(handlers::list_items)))
                .service(
                    web::scope("/items/{item_id}")
                        .service(
                            web::resource("")
                                .route(web::get().to(handlers::get_item))
                                .route(web::patch().to(handlers::patch_item))
                                .route(web::delete().to(handlers::delete_item)),
                        )
                        .service(
                            web::resource("/reservations")
                                .route(web::get().to(handlers::item_reservations)),
                        ),
                )
                .service(
                    web::resource("/books")
                        .route(web::get().to(handlers::list_books))
                        .route(web::post().to(handlers::add_book)),
                )
                .service(
                    web::resource("/periodicals")
                        .route(web::get().to(handlers::list_periodicals))
                        .route(web::post().to(handlers::add_periodical)),
                )
                .service(
                    web::resource("/categories")
                        .route(web::get().to(handlers::list_categories))
                        .route(web::post().to(handlers::add_category)),
                )
                .service(
                    web::scope("/categories/{category_id}")
                        .service(
                            web::resource("")
                                .route(web::get().to(handlers::get_category))
                                .route(web::put().to(handlers::update_category))
                                .route(web::delete().to(handlers::delete_category)),
                        )
                        .service(
                            web::resource("/items")
                                .route(web::get().to(handlers::category_items)),
                        )
                        .service(
                            web::resource("/items/{item_id}")
                                .route(web::post().to(handlers::link_item))
                                .route(web::delete().to(handlers::unlink_item)),
                        ),
                )
                .service(
                    web::resource("/loans")
                        .route(web::get().to(handlers::list_loans))
                        .route(web::post().to(handlers::borrow)),
                )
                .service(
                    web::resource("/loans/{loan_id}/return")
                        .route(web::post().to(handlers::return_loan)),
                )
                .service(
                    web::resource("/reservations")
                        .route(web::get().to(handlers::list_reservations))
                        .route(web::post().to(handlers::reserve)),
                )
                .service(
                    web::resource("/reservations/{reservation_id}")
                        .route(web::delete().to(handlers::cancel_reservation)),
                )
                .service(
                    web::scope("/dashboard")
                        .service(
                            web::resource("/summary")
                                .route(web::get().to(handlers::dashboard_summary)),
                        )
                        .service(
                            web::resource("/items-by-category")
                                .route(web::get().to(handlers::items_by_category)),
                        )
                        .service(
                            web::resource("/loans-by-period")
                                .route(web::get().to(handlers::loans_by_period)),
                        )
                        .service(
                            web::resource("/top-borrowed")
                                .route(web::get().to(handlers::top_borrowed)),
                        )
                        .service(
                            web::resource("/overdue-loans")
                                .route(web::get().to(handlers::overdue_loans)),
                        ),
                ),
        );
}
